#[path = "progress/format.rs"]
mod format;

pub use format::{ByteSize, Clock, GibSize};

use std::{
    collections::VecDeque,
    io::{self, Write},
    time::{Duration, Instant},
};

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    QueueableCommand,
    style::{Print, Stylize},
    terminal::{self, Clear, ClearType},
    tty::IsTty,
};
use log::debug;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

/// How often the display samples the byte counter and redraws
pub const TICK: Duration = Duration::from_millis(100);

/// Transfer rate over a sliding window of samples.
#[derive(Debug)]
pub struct RateWindow {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record the counter value observed at `now`. Samples older than the
    /// window are dropped, except for the newest of them which anchors the
    /// start of the window.
    pub fn record(&mut self, now: Instant, value: u64) {
        self.samples.push_back((now, value));

        while self.samples.len() > 2
            && now.duration_since(self.samples[1].0) >= self.window
        {
            self.samples.pop_front();
        }
    }

    /// Units per second between the oldest and newest sample.
    pub fn rate(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(&(t0, v0)), Some(&(t1, v1))) if t1 > t0 => {
                v1.saturating_sub(v0) as f64 / (t1 - t0).as_secs_f64()
            }
            _ => 0.0,
        }
    }
}

/// How a progress line is written to the terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Style {
    /// The same line is redrawn in place with a bar sized to the terminal
    Interactive,
    /// Every frame is a new line with no bar
    Append,
}

impl Style {
    fn detect(term: &impl IsTty) -> Self {
        if term.is_tty() {
            Self::Interactive
        } else {
            Self::Append
        }
    }
}

/// Byte progress line: elapsed time, bar, percentage, position, speed and ETA.
pub struct ProgressBar<T: Write + IsTty> {
    term: T,
    style: Style,
    len: u64,
    started: Instant,
    rate: RateWindow,
}

impl<T: Write + IsTty> ProgressBar<T> {
    pub fn new(term: T, len: u64) -> Self {
        Self {
            style: Style::detect(&term),
            term,
            len,
            started: Instant::now(),
            rate: RateWindow::new(Duration::from_secs(10)),
        }
    }

    pub fn style(&self) -> Style {
        self.style
    }

    fn eta(&self, pos: u64) -> Duration {
        let rate = self.rate.rate();
        if rate > 0.0 {
            Duration::from_secs_f64(self.len.saturating_sub(pos) as f64 / rate)
        } else {
            Duration::ZERO
        }
    }

    fn line(&self, pos: u64) -> String {
        let ratio = if self.len == 0 {
            1.0
        } else {
            (pos as f64 / self.len as f64).clamp(0.0, 1.0)
        };

        let stats = format!(
            "{percent:.0}% {pos}/{len} ({speed}/s, {eta})",
            percent = ratio * 100.0,
            pos = ByteSize(pos),
            len = ByteSize(self.len),
            speed = ByteSize(self.rate.rate() as u64),
            eta = Clock(self.eta(pos)),
        );
        let elapsed = format!("[{}]", Clock(self.started.elapsed()));

        match self.style {
            Style::Append => format!("{elapsed} {stats}"),
            Style::Interactive => {
                let width = terminal::size().map(|s| s.0 as usize).unwrap_or(80);
                let bar_width = width.saturating_sub(elapsed.len() + stats.len() + 3);
                let filled = (ratio * bar_width as f64).round() as usize;

                if bar_width == 0 {
                    format!("{elapsed} {stats}")
                } else {
                    format!(
                        "{elapsed} {}{} {stats}",
                        "#".repeat(filled).cyan(),
                        "-".repeat(bar_width - filled).blue(),
                    )
                }
            }
        }
    }

    /// Record `pos` and draw a frame.
    pub fn draw(&mut self, pos: u64) -> io::Result<()> {
        self.rate.record(Instant::now(), pos);
        let line = self.line(pos);

        match self.style {
            Style::Interactive => {
                self.term
                    .queue(Hide)?
                    .queue(Clear(ClearType::CurrentLine))?
                    .queue(MoveToColumn(0))?
                    .queue(Print(line))?;
            }
            Style::Append => {
                self.term
                    .queue(Print(line))?
                    .queue(Print('\n'))?;
            }
        }

        self.term.flush()
    }

    /// Draw the last frame for `pos` and leave it on screen.
    pub fn finish(&mut self, pos: u64) -> io::Result<()> {
        self.draw(pos)?;

        if self.style == Style::Interactive {
            self.term
                .queue(Print('\n'))?
                .queue(Show)?
                .flush()?;
        }

        Ok(())
    }
}

/// Progress display that runs on its own task. The task samples a counter
/// through a reader closure every [`TICK`] so the producer of the counter
/// never waits on rendering.
pub struct ProgressDisplay {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<io::Result<()>>,
}

impl ProgressDisplay {
    /// Start drawing to stderr. `len` is the final counter value.
    pub fn spawn<R>(len: u64, reader: R) -> Self
    where
        R: Fn() -> u64 + Send + 'static,
    {
        Self::spawn_with(io::stderr(), len, reader)
    }

    /// Start drawing to a specific terminal.
    pub fn spawn_with<T, R>(term: T, len: u64, reader: R) -> Self
    where
        T: Write + IsTty + Send + 'static,
        R: Fn() -> u64 + Send + 'static,
    {
        let (tx, mut rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut bar = ProgressBar::new(term, len);
            let mut interval = time::interval(TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = interval.tick() => bar.draw(reader())?,
                }
            }

            bar.finish(reader())
        });

        Self {
            stop: Some(tx),
            task,
        }
    }

    /// Stop the task after it draws the final frame.
    pub async fn finish(mut self) -> io::Result<()> {
        if let Some(tx) = self.stop.take() {
            // The task may already be gone if drawing failed
            let _ = tx.send(());
        }

        match self.task.await {
            Ok(r) => r,
            Err(e) => {
                debug!("Progress task did not complete: {e}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Error, ErrorKind},
        str,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc, Mutex,
        },
    };

    use super::*;

    #[derive(Clone)]
    struct TestTerm {
        buf: Arc<Mutex<String>>,
        tty: bool,
    }

    impl TestTerm {
        fn new(tty: bool) -> Self {
            Self {
                buf: Arc::new(Mutex::new(String::new())),
                tty,
            }
        }

        fn take(&self) -> String {
            std::mem::take(&mut *self.buf.lock().unwrap())
        }
    }

    impl Write for TestTerm {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let s = str::from_utf8(buf)
                .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
            self.buf.lock().unwrap().push_str(s);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl IsTty for TestTerm {
        fn is_tty(&self) -> bool {
            self.tty
        }
    }

    #[test]
    fn test_rate_window() {
        let start = Instant::now();
        let mut rate = RateWindow::new(Duration::from_secs(10));
        assert_eq!(rate.rate(), 0.0);

        rate.record(start, 0);
        assert_eq!(rate.rate(), 0.0);

        rate.record(start + Duration::from_secs(2), 200);
        assert_eq!(rate.rate(), 100.0);

        // Old samples age out of the window
        rate.record(start + Duration::from_secs(20), 1200);
        rate.record(start + Duration::from_secs(30), 1300);
        assert_eq!(rate.rate(), 10.0);
    }

    #[test]
    fn test_append() {
        let term = TestTerm::new(false);
        let mut bar = ProgressBar::new(term.clone(), 10);
        assert_eq!(bar.style(), Style::Append);

        bar.draw(1).unwrap();
        let output = term.take();
        let pieces: Vec<&str> = output.split(' ').collect();
        assert_eq!(pieces[0], "[00:00:00]");
        assert_eq!(pieces[1], "10%");
        assert_eq!(pieces[2], "1B/10B");
        assert!(output.ends_with('\n'));

        bar.finish(10).unwrap();
        let output = term.take();
        let pieces: Vec<&str> = output.split(' ').collect();
        assert_eq!(pieces[1], "100%");
        assert_eq!(pieces[2], "10B/10B");
        assert_eq!(output.lines().count(), 1);
    }

    #[test]
    fn test_interactive() {
        let term = TestTerm::new(true);
        let mut bar = ProgressBar::new(term.clone(), 10);
        assert_eq!(bar.style(), Style::Interactive);

        bar.draw(5).unwrap();
        let output = term.take();
        assert!(output.starts_with('\u{1b}'));
        assert!(!output.contains('\n'));
        assert!(output.contains(" 50% 5B/10B "));

        bar.finish(10).unwrap();
        let output = term.take();
        assert!(output.contains(" 100% 10B/10B "));
        assert!(output.contains('\n'));
    }

    #[test]
    fn test_empty_length() {
        let term = TestTerm::new(false);
        let mut bar = ProgressBar::new(term.clone(), 0);

        bar.draw(0).unwrap();
        assert!(term.take().contains(" 100% 0B/0B "));
    }

    #[tokio::test]
    async fn test_display_samples_counter() {
        let term = TestTerm::new(false);
        let counter = Arc::new(AtomicU64::new(0));

        let reader = counter.clone();
        let display = ProgressDisplay::spawn_with(term.clone(), 100, move || {
            reader.load(Ordering::Relaxed)
        });

        counter.store(40, Ordering::Relaxed);
        time::sleep(TICK * 3).await;
        counter.store(100, Ordering::Relaxed);
        display.finish().await.unwrap();

        let output = term.take();
        let last = output.lines().last().unwrap();
        assert!(output.lines().count() >= 2);
        assert!(last.contains(" 100% 100B/100B "));
    }
}
