use clap::Parser;
use stagehand::cli::{print_error, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.execute().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
