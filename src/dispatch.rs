use std::{
    future::Future,
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use log::{error, info};
use serde::Serialize;
use tokio::{
    sync::{mpsc, Semaphore},
    task::{JoinHandle, JoinSet},
    time::{sleep, Duration},
};

use crate::record::append_jsonl;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 20;
pub const DEFAULT_DELAY_MS: u64 = 500;

/// How completion-calling work is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// One call at a time with a pause after each.
    Sequential,
    /// Up to `max_in_flight` calls at once; results arrive in completion order.
    Concurrent,
}

/// Ask on the terminal, like the old scripts did, when no `--mode` was given.
pub fn prompt_mode() -> Result<Mode> {
    print!("Choose processing mode: (S)ynchronous or (A)synchronous? [S/A]: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    parse_mode_choice(&line)
}

fn parse_mode_choice(line: &str) -> Result<Mode> {
    match line.trim().to_lowercase().as_str() {
        "s" | "sequential" => Ok(Mode::Sequential),
        "a" | "concurrent" => Ok(Mode::Concurrent),
        other => bail!("invalid choice {other:?}; run again and choose 'S' or 'A'"),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    pub mode: Mode,
    pub max_in_flight: usize,
    /// Pause after every call, to stay under the requests-per-minute limit.
    pub delay: Duration,
}

impl Dispatcher {
    pub fn new(mode: Mode, max_in_flight: usize, delay: Duration) -> Result<Self> {
        if max_in_flight == 0 {
            bail!("--max-in-flight must be at least 1");
        }
        Ok(Self { mode, max_in_flight, delay })
    }

    /// Run `work` over every item. Returns `(input index, result)` in the
    /// order the work finished. The first error aborts the remaining work:
    /// nothing new is started and tasks still running are cancelled.
    pub async fn run<I, R, F, Fut>(
        &self,
        items: Vec<I>,
        bar: &ProgressBar,
        work: F,
    ) -> Result<Vec<(usize, R)>>
    where
        I: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let total = items.len();
        let mut done = Vec::with_capacity(total);

        match self.mode {
            Mode::Sequential => {
                for (idx, item) in items.into_iter().enumerate() {
                    let out = work(idx, item).await.with_context(|| format!("item {}", idx + 1))?;
                    done.push((idx, out));
                    bar.inc(1);
                    sleep(self.delay).await;
                }
            }
            Mode::Concurrent => {
                let sem = Arc::new(Semaphore::new(self.max_in_flight));
                let work = Arc::new(work);
                let delay = self.delay;
                let mut set = JoinSet::new();

                for (idx, item) in items.into_iter().enumerate() {
                    // reap finished tasks while waiting for a slot, so an
                    // error stops the run before more work is started
                    let permit = loop {
                        tokio::select! {
                            biased;
                            Some(joined) = set.join_next(), if !set.is_empty() => {
                                let item = joined.context("join dispatch task")??;
                                done.push(item);
                                bar.inc(1);
                            }
                            permit = sem.clone().acquire_owned() => {
                                break permit.context("acquire dispatch permit")?;
                            }
                        }
                    };
                    let work = Arc::clone(&work);
                    set.spawn(async move {
                        let _permit = permit;
                        let out = work(idx, item).await;
                        sleep(delay).await;
                        out.map(|r| (idx, r)).with_context(|| format!("item {}", idx + 1))
                    });
                }

                while let Some(joined) = set.join_next().await {
                    let item = joined.context("join dispatch task")??;
                    done.push(item);
                    bar.inc(1);
                }
            }
        }
        info!("dispatched {total} item(s) in {:?} mode", self.mode);
        Ok(done)
    }
}

/// Single writer for line-delimited JSON. Tasks send records through the
/// channel; only the writer task touches the file.
pub struct JsonlSink<T> {
    tx: mpsc::Sender<T>,
    handle: JoinHandle<Result<usize>>,
}

impl<T: Serialize + Send + 'static> JsonlSink<T> {
    pub fn spawn(path: PathBuf, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<T>(capacity.max(1));
        let handle = tokio::spawn(async move {
            let mut written = 0usize;
            while let Some(item) = rx.recv().await {
                if let Err(err) = append_jsonl(&path, &item) {
                    error!("jsonl writer stopped after {written} line(s): {err:#}");
                    return Err(err);
                }
                written += 1;
            }
            Ok::<_, anyhow::Error>(written)
        });
        Self { tx, handle }
    }

    pub fn sender(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }

    /// Close the channel and wait for every queued line to land on disk.
    pub async fn finish(self) -> Result<usize> {
        drop(self.tx);
        self.handle.await.context("join jsonl writer")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{read_jsonl, StreamRecord};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(mode: Mode) -> Dispatcher {
        Dispatcher::new(mode, 3, Duration::ZERO).unwrap()
    }

    #[test]
    fn mode_choice_parsing() {
        assert_eq!(parse_mode_choice("S\n").unwrap(), Mode::Sequential);
        assert_eq!(parse_mode_choice(" a ").unwrap(), Mode::Concurrent);
        assert!(parse_mode_choice("x").is_err());
    }

    #[tokio::test]
    async fn sequential_keeps_input_order() {
        let bar = ProgressBar::hidden();
        let out = quick(Mode::Sequential)
            .run(vec![1, 2, 3], &bar, |_, n| async move { Ok::<_, anyhow::Error>(n * 10) })
            .await
            .unwrap();
        assert_eq!(out, vec![(0, 10), (1, 20), (2, 30)]);
        assert_eq!(bar.position(), 3);
    }

    #[tokio::test]
    async fn concurrent_returns_every_index() {
        let bar = ProgressBar::hidden();
        let items: Vec<u64> = (0..10).collect();
        let mut out = quick(Mode::Concurrent)
            .run(items, &bar, |_, n| async move {
                sleep(Duration::from_millis(10 - n)).await;
                Ok::<_, anyhow::Error>(n)
            })
            .await
            .unwrap();
        out.sort();
        assert_eq!(out.len(), 10);
        assert!(out.iter().all(|(idx, n)| *idx as u64 == *n));
    }

    #[tokio::test]
    async fn concurrent_failure_aborts_the_run() {
        let bar = ProgressBar::hidden();
        let result = quick(Mode::Concurrent)
            .run(vec![1, 2, 3], &bar, |_, n| async move {
                if n == 2 {
                    Err(anyhow!("boom"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn concurrent_failure_stops_new_work() {
        let bar = ProgressBar::hidden();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);
        let result = Dispatcher::new(Mode::Concurrent, 2, Duration::ZERO)
            .unwrap()
            .run((0..200).collect::<Vec<u64>>(), &bar, move |_, n| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        return Err(anyhow!("401 Unauthorized"));
                    }
                    sleep(Duration::from_millis(20)).await;
                    Ok(n)
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("401"));
        assert!(started.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test]
    async fn sink_reports_its_own_write_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be opened for append
        let sink: JsonlSink<StreamRecord> = JsonlSink::spawn(dir.path().to_path_buf(), 1);
        let rec = StreamRecord { user_query: "q".into(), response: "r".into() };
        let _ = sink.sender().send(rec).await;

        let err = sink.finish().await.unwrap_err();
        assert!(format!("{err:#}").contains("for append"));
    }

    #[tokio::test]
    async fn sink_writes_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.jsonl");
        let sink = JsonlSink::spawn(path.clone(), 4);
        let bar = ProgressBar::hidden();
        let tx = sink.sender();

        quick(Mode::Concurrent)
            .run((0..8).collect::<Vec<u32>>(), &bar, move |_, n| {
                let tx = tx.clone();
                async move {
                    let rec = StreamRecord { user_query: format!("q{n}"), response: format!("r{n}") };
                    tx.send(rec).await.map_err(|_| anyhow!("writer gone"))?;
                    Ok::<_, anyhow::Error>(())
                }
            })
            .await
            .unwrap();

        assert_eq!(sink.finish().await.unwrap(), 8);
        let back: Vec<StreamRecord> = read_jsonl(&path).unwrap();
        assert_eq!(back.len(), 8);
    }
}
