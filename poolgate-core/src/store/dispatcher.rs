use crate::bridge::AioCompletion;
use crate::store::AioReply;
use crate::{GateError, Result};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;

/// Store client threads per cluster unless the caller sizes the pool itself.
pub const DEFAULT_AIO_WORKERS: usize = 16;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Store client threads. Submitted work runs off the request path on one of `workers`
/// threads, which then completes the matching completion. Jobs from different slots
/// overlap; a slow or abandoned job only occupies its own worker.
pub struct AioDispatcher {
    sender: mpsc::Sender<Job>,
}

impl AioDispatcher {
    pub fn spawn(name: &str, workers: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        for index in 0..workers.max(1) {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || {
                    loop {
                        let job = receiver
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .recv();
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    }
                })?;
        }

        Ok(Self { sender })
    }

    pub fn submit<F>(&self, completion: &AioCompletion, work: F) -> Result<()>
    where
        F: FnOnce() -> Result<AioReply> + Send + 'static,
    {
        let completion = completion.clone();
        self.sender
            .send(Box::new(move || completion.complete(work())))
            .map_err(|_| GateError::Store("store client threads have stopped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn completes_on_dispatcher_thread() {
        let dispatcher = AioDispatcher::spawn("aio-test", 1).unwrap();
        let (fired_tx, fired_rx) = mpsc::channel();
        let completion = AioCompletion::new(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            fired_tx.send(name).unwrap();
        }));

        dispatcher
            .submit(&completion, || Ok(AioReply::Done))
            .unwrap();

        let name = fired_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("aio-test-0"));
        assert!(completion.is_complete());
    }

    #[test]
    fn jobs_from_different_callers_overlap() {
        let dispatcher = AioDispatcher::spawn("aio-test", 2).unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let (done_tx, done_rx) = mpsc::channel();

        let completions: Vec<AioCompletion> = (0..2)
            .map(|_| {
                let done_tx = done_tx.clone();
                AioCompletion::new(Box::new(move || done_tx.send(()).unwrap()))
            })
            .collect();

        // Each job waits for the other, so both only finish if they run at the same time.
        for completion in &completions {
            let barrier = barrier.clone();
            dispatcher
                .submit(completion, move || {
                    barrier.wait();
                    Ok(AioReply::Done)
                })
                .unwrap();
        }

        for _ in 0..2 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(completions.iter().all(AioCompletion::is_complete));
    }
}
