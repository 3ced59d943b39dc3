// Dashboard module - terminal view of the status board

mod host;
pub mod render;

pub use host::{HostSampler, HostSnapshot};

use crate::shutdown::wait_for_shutdown;
use crate::supervisor::StatusBoard;
use crossterm::{
    cursor, execute,
    terminal::{self, ClearType},
};
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Redraws the status board on a fixed cadence. Only ever reads the board.
pub struct Dashboard {
    board: StatusBoard,
    refresh: Duration,
    max_metrics: usize,
    sampler: HostSampler,
    started: Instant,
}

impl Dashboard {
    pub fn new(board: StatusBoard, refresh: Duration, max_metrics: usize) -> Self {
        Self {
            board,
            refresh,
            max_metrics,
            sampler: HostSampler::new(),
            started: Instant::now(),
        }
    }

    /// Render one frame from the current board contents
    pub fn render_frame(&mut self) -> String {
        let statuses = self.board.snapshot();
        let pids: Vec<u32> = statuses.iter().filter_map(|s| s.pid).collect();
        let memory = self.sampler.process_memory(&pids);
        let host = self.sampler.sample();

        render::frame(
            &statuses,
            &memory,
            &host,
            self.started.elapsed(),
            self.max_metrics,
        )
    }

    /// Redraw until `shutdown` is raised
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            let frame = self.render_frame();
            if let Err(e) = draw(&frame) {
                tracing::warn!("Failed to draw dashboard: {}", e);
            }
        }
    }
}

fn draw(frame: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    execute!(
        stdout,
        terminal::Clear(ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    stdout.write_all(frame.as_bytes())?;
    stdout.flush()
}
