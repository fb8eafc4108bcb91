use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use tgf_core::{
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
        types::MessengerLimits,
    },
    service::BotService,
};

use crate::{handlers, TelegramMessenger};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BotService>,
    pub queues: Arc<UserQueues>,
}

pub type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One FIFO worker per user. Jobs for the same user run strictly in arrival order,
/// one at a time; different users never wait on each other. A worker exits after
/// `idle` without work and is recreated on the next job.
pub struct UserQueues {
    idle: Duration,
    inner: Mutex<HashMap<i64, mpsc::UnboundedSender<Job>>>,
}

impl Default for UserQueues {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

impl UserQueues {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub async fn enqueue(self: &Arc<Self>, user_id: i64, job: Job) {
        let mut map = self.inner.lock().await;
        let job = match map.get(&user_id) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                // Worker is gone: start a fresh one.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // Cannot fail: `rx` is alive until the worker below drops it.
        let _ = tx.send(job);
        map.insert(user_id, tx);
        tokio::spawn(Arc::clone(self).work(user_id, rx));
    }

    async fn work(self: Arc<Self>, user_id: i64, mut rx: mpsc::UnboundedReceiver<Job>) {
        loop {
            match tokio::time::timeout(self.idle, rx.recv()).await {
                Ok(Some(job)) => job.await,
                Ok(None) => break,
                Err(_) => {
                    // `enqueue` sends under the map lock: once the queue is seen empty
                    // here, no job can reach it before the entry is gone.
                    let mut map = self.inner.lock().await;
                    match rx.try_recv() {
                        Ok(job) => {
                            drop(map);
                            job.await;
                        }
                        Err(_) => {
                            map.remove(&user_id);
                            break;
                        }
                    }
                }
            }
        }
        debug!(user_id, "user queue worker exited");
    }

    pub async fn active_workers(&self) -> usize {
        self.inner.lock().await.len()
    }
}

pub fn new_bot(token: &str) -> Bot {
    Bot::new(token)
}

/// Telegram messenger behind the flood-control throttle. 429s that still happen
/// are retried once by the messenger itself.
pub fn build_messenger(bot: Bot, limits: MessengerLimits) -> Arc<dyn MessagingPort> {
    let raw: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot, limits));
    Arc::new(ThrottledMessenger::new(raw, ThrottleConfig::default()))
}

pub async fn run_polling(bot: Bot, service: Arc<BotService>) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        info!(bot = %me.username(), "bot started");
    }

    let state = Arc::new(AppState {
        service,
        queues: Arc::new(UserQueues::default()),
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    info!("bot stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jobs_for_one_user_run_in_order() {
        let queues = Arc::new(UserQueues::default());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..5u64 {
            let seen = seen.clone();
            queues
                .enqueue(
                    1,
                    Box::pin(async move {
                        // Earlier jobs sleep longer; order must still hold.
                        tokio::time::sleep(Duration::from_millis(25 - i * 5)).await;
                        seen.lock().unwrap().push(i);
                    }),
                )
                .await;
        }

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        queues
            .enqueue(
                1,
                Box::pin(async move {
                    let _ = done_tx.send(());
                }),
            )
            .await;
        done_rx.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn users_do_not_block_each_other() {
        let queues = Arc::new(UserQueues::default());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        queues
            .enqueue(
                1,
                Box::pin(async move {
                    let _ = release_rx.await;
                }),
            )
            .await;

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        queues
            .enqueue(
                2,
                Box::pin(async move {
                    let _ = done_tx.send(());
                }),
            )
            .await;

        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .expect("user 2 must not wait for user 1")
            .unwrap();
        assert_eq!(queues.active_workers().await, 2);
        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn idle_worker_exits_and_is_recreated() {
        let queues = Arc::new(UserQueues::new(Duration::from_millis(20)));

        let (tx, rx) = tokio::sync::oneshot::channel();
        queues
            .enqueue(7, Box::pin(async move {
                let _ = tx.send(());
            }))
            .await;
        rx.await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queues.active_workers().await, 0);

        let (tx, rx) = tokio::sync::oneshot::channel();
        queues
            .enqueue(7, Box::pin(async move {
                let _ = tx.send(());
            }))
            .await;
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn retiring_worker_never_overlaps_its_successor() {
        let queues = Arc::new(UserQueues::new(Duration::from_millis(1)));
        let running = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let overlap = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..40u32 {
            let (running, overlap, seen) = (running.clone(), overlap.clone(), seen.clone());
            queues
                .enqueue(
                    3,
                    Box::pin(async move {
                        use std::sync::atomic::Ordering;
                        if running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.store(true, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        seen.lock().unwrap().push(i);
                        running.fetch_sub(1, Ordering::SeqCst);
                    }),
                )
                .await;
            // Land enqueues right around the idle deadline.
            tokio::time::sleep(Duration::from_millis(u64::from(i % 3))).await;
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        queues
            .enqueue(3, Box::pin(async move {
                let _ = tx.send(());
            }))
            .await;
        rx.await.unwrap();

        assert!(!overlap.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(*seen.lock().unwrap(), (0..40).collect::<Vec<_>>());
    }
}
