// Paged session manager - one actor task per live paged message.
//
// Every displayed list gets a dedicated task owning its PagedResult; the
// manager routes interaction events to it over a channel and the task
// applies them sequentially, so page state never needs a lock. A fresh
// inactivity window starts after every handled event.

use super::paged_result::{PagePayload, PagedResult, Selected};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PagedError {
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Delivery seam: how payloads reach the platform. The Discord layer
/// implements this with real messages and buttons.
#[async_trait]
pub trait PagedTransport: Send + Sync + 'static {
    /// Send the initial payload, returning the created message's id.
    async fn send(&self, channel_id: u64, payload: &PagePayload) -> Result<u64, PagedError>;

    async fn edit(
        &self,
        channel_id: u64,
        message_id: u64,
        payload: &PagePayload,
    ) -> Result<(), PagedError>;

    /// End-of-life cleanup; best effort, failures are the transport's
    /// problem to log.
    async fn delete(&self, channel_id: u64, message_id: u64);
}

/// An owner interaction with a live paged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagedEvent {
    PreviousPage,
    NextPage,
    /// Jump straight to a page; out-of-range targets clamp.
    GoTo(usize),
    /// Raw typed input; the session decides whether it selects anything.
    Select(String),
    Cancel,
}

struct SessionHandle {
    owner_id: u64,
    events: mpsc::Sender<PagedEvent>,
}

pub struct PagedManager<Tr> {
    transport: Arc<Tr>,
    sessions: DashMap<u64, SessionHandle>,
}

impl<Tr: PagedTransport> PagedManager<Tr> {
    pub fn new(transport: Arc<Tr>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            sessions: DashMap::new(),
        })
    }

    /// Start a paged session in a channel on behalf of `owner_id`.
    ///
    /// A single-entry list with auto-select fires the selection callback
    /// without sending anything. Otherwise the first page is sent, the
    /// session registered, and its actor task spawned.
    pub async fn execute<T>(
        self: &Arc<Self>,
        owner_id: u64,
        channel_id: u64,
        mut paged: PagedResult<T>,
    ) -> Result<(), PagedError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if paged.is_auto_select() && paged.entries().len() == 1 {
            let item = paged.entries()[0].clone();
            if let Some(callback) = paged.take_on_select() {
                callback(Selected {
                    page: 1,
                    index: 1,
                    item,
                });
            }
            return Ok(());
        }

        let message_id = self.transport.send(channel_id, &paged.render()).await?;

        let (events, receiver) = mpsc::channel(16);
        self.sessions.insert(
            message_id,
            SessionHandle {
                owner_id,
                events,
            },
        );

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager
                .run_session(channel_id, message_id, paged, receiver)
                .await;
        });

        Ok(())
    }

    /// Route an event to the session behind `message_id`. Events from anyone
    /// but the session owner are dropped. Returns whether the event was
    /// accepted.
    pub async fn dispatch(&self, message_id: u64, user_id: u64, event: PagedEvent) -> bool {
        let events = match self.sessions.get(&message_id) {
            Some(session) if session.owner_id == user_id => session.events.clone(),
            _ => return false,
        };
        events.send(event).await.is_ok()
    }

    /// Whether a message id belongs to a live session (used to decide if an
    /// interaction is ours at all).
    pub fn is_session(&self, message_id: u64) -> bool {
        self.sessions.contains_key(&message_id)
    }

    async fn run_session<T>(
        &self,
        channel_id: u64,
        message_id: u64,
        mut paged: PagedResult<T>,
        mut receiver: mpsc::Receiver<PagedEvent>,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        loop {
            let event = match tokio::time::timeout(paged.inactivity_window(), receiver.recv()).await
            {
                // Inactivity window elapsed with no event
                Err(_) => {
                    if let Some(callback) = paged.take_on_timeout() {
                        callback();
                    }
                    break;
                }
                Ok(None) => break,
                Ok(Some(event)) => event,
            };

            match event {
                PagedEvent::PreviousPage => {
                    paged.previous_page();
                    self.redraw(channel_id, message_id, &paged.render()).await;
                }
                PagedEvent::NextPage => {
                    paged.next_page();
                    self.redraw(channel_id, message_id, &paged.render()).await;
                }
                PagedEvent::GoTo(page) => {
                    paged.set_page(page);
                    self.redraw(channel_id, message_id, &paged.render()).await;
                }
                PagedEvent::Select(input) => {
                    if let Some(selected) = paged.select(&input) {
                        if let Some(callback) = paged.take_on_select() {
                            callback(selected);
                        }
                        break;
                    }
                    // Unrecognized input is ignored but still restarted the
                    // inactivity window
                }
                PagedEvent::Cancel => break,
            }
        }

        self.sessions.remove(&message_id);
        self.transport.delete(channel_id, message_id).await;
    }

    async fn redraw(&self, channel_id: u64, message_id: u64, payload: &PagePayload) {
        if let Err(err) = self.transport.edit(channel_id, message_id, payload).await {
            tracing::warn!(message_id, error = %err, "Failed to redraw paged message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct MockTransport {
        next_id: AtomicU64,
        sends: Mutex<Vec<(u64, PagePayload)>>,
        edits: Mutex<Vec<(u64, u64, PagePayload)>>,
        deletes: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl PagedTransport for MockTransport {
        async fn send(&self, channel_id: u64, payload: &PagePayload) -> Result<u64, PagedError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1000;
            self.sends.lock().unwrap().push((channel_id, payload.clone()));
            Ok(id)
        }

        async fn edit(
            &self,
            channel_id: u64,
            message_id: u64,
            payload: &PagePayload,
        ) -> Result<(), PagedError> {
            self.edits
                .lock()
                .unwrap()
                .push((channel_id, message_id, payload.clone()));
            Ok(())
        }

        async fn delete(&self, channel_id: u64, message_id: u64) {
            self.deletes.lock().unwrap().push((channel_id, message_id));
        }
    }

    fn entries(count: usize) -> Vec<String> {
        (1..=count).map(|n| format!("entry {n}")).collect()
    }

    #[tokio::test]
    async fn navigation_event_redraws_the_message() {
        let transport = Arc::new(MockTransport::default());
        let manager = PagedManager::new(Arc::clone(&transport));

        let paged = PagedResult::new(entries(25), |e: &String| e.clone());
        manager.execute(7, 42, paged).await.unwrap();

        let message_id = 1000;
        assert!(manager.is_session(message_id));
        assert!(manager.dispatch(message_id, 7, PagedEvent::NextPage).await);

        // Give the actor a chance to process
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let edits = transport.edits.lock().unwrap();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].2.content.starts_with("Page **2/3**"));
    }

    #[tokio::test]
    async fn go_to_jumps_and_clamps() {
        let transport = Arc::new(MockTransport::default());
        let manager = PagedManager::new(Arc::clone(&transport));

        let paged = PagedResult::new(entries(25), |e: &String| e.clone());
        manager.execute(7, 42, paged).await.unwrap();

        assert!(manager.dispatch(1000, 7, PagedEvent::GoTo(3)).await);
        assert!(manager.dispatch(1000, 7, PagedEvent::GoTo(99)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let edits = transport.edits.lock().unwrap();
        assert_eq!(edits.len(), 2);
        assert!(edits[0].2.content.starts_with("Page **3/3**"));
        assert!(edits[1].2.content.starts_with("Page **3/3**"));
    }

    #[tokio::test]
    async fn only_the_owner_can_drive_the_session() {
        let transport = Arc::new(MockTransport::default());
        let manager = PagedManager::new(transport);

        let paged = PagedResult::new(entries(25), |e: &String| e.clone());
        manager.execute(7, 42, paged).await.unwrap();

        assert!(!manager.dispatch(1000, 8, PagedEvent::NextPage).await);
        assert!(!manager.dispatch(9999, 7, PagedEvent::NextPage).await);
        assert!(manager.dispatch(1000, 7, PagedEvent::NextPage).await);
    }

    #[tokio::test]
    async fn selection_fires_callback_and_closes_the_session() {
        let transport = Arc::new(MockTransport::default());
        let manager = PagedManager::new(Arc::clone(&transport));

        let (tx, rx) = oneshot::channel();
        let paged = PagedResult::new(entries(5), |e: &String| e.clone())
            .selectable(true)
            .on_select(move |selected| {
                let _ = tx.send(selected);
            });
        manager.execute(7, 42, paged).await.unwrap();

        assert!(manager
            .dispatch(1000, 7, PagedEvent::Select("2".into()))
            .await);

        let selected = rx.await.unwrap();
        assert_eq!(selected.item, "entry 2");
        assert_eq!(selected.index, 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!manager.is_session(1000));
        assert_eq!(*transport.deletes.lock().unwrap(), vec![(42, 1000)]);
    }

    #[tokio::test]
    async fn unrecognized_input_keeps_the_session_alive() {
        let transport = Arc::new(MockTransport::default());
        let manager = PagedManager::new(transport);

        let paged = PagedResult::new(entries(5), |e: &String| e.clone()).selectable(true);
        manager.execute(7, 42, paged).await.unwrap();

        assert!(manager
            .dispatch(1000, 7, PagedEvent::Select("nonsense".into()))
            .await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.is_session(1000));
    }

    #[tokio::test]
    async fn auto_select_bypasses_the_ui_for_one_entry() {
        let transport = Arc::new(MockTransport::default());
        let manager = PagedManager::new(Arc::clone(&transport));

        let (tx, rx) = oneshot::channel();
        let paged = PagedResult::new(entries(1), |e: &String| e.clone())
            .auto_select(true)
            .selectable(true)
            .on_select(move |selected| {
                let _ = tx.send(selected);
            });
        manager.execute(7, 42, paged).await.unwrap();

        assert_eq!(rx.await.unwrap().item, "entry 1");
        assert!(transport.sends.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_closes_and_deletes_the_message() {
        let transport = Arc::new(MockTransport::default());
        let manager = PagedManager::new(Arc::clone(&transport));

        let (tx, rx) = oneshot::channel();
        let paged = PagedResult::new(entries(5), |e: &String| e.clone())
            .timeout(Duration::from_secs(60))
            .on_timeout(move || {
                let _ = tx.send(());
            });
        manager.execute(7, 42, paged).await.unwrap();

        // Paused time auto-advances once every task is idle
        rx.await.unwrap();
        tokio::task::yield_now().await;
        assert!(!manager.is_session(1000));
        assert_eq!(*transport.deletes.lock().unwrap(), vec![(42, 1000)]);
    }
}
