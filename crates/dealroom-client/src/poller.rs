//! Sale-request polling.
//!
//! While a thread is open its purchase-intent records are re-read on a fixed
//! interval and the local list replaced wholesale.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use dealroom_net::Transport;
use dealroom_shared::constants::SALE_REQUEST_POLL_INTERVAL;
use dealroom_shared::{CreateSaleRequest, SaleRequest, SaleRequestStatus, ThreadId, UserId};

use crate::error::{ClientError, Result, ValidationError};
use crate::state::lock;

/// What the sale button offers the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleAction {
    /// Nobody has a pending request; the user may open one.
    Sell,
    /// The user's own request is pending.
    Selling,
    /// The counterparty's request is pending; the user may buy.
    Purchase,
}

pub fn sale_action(requests: &[SaleRequest], me: &UserId) -> SaleAction {
    let pending = |r: &&SaleRequest| r.status == SaleRequestStatus::Pending;
    if requests.iter().filter(pending).any(|r| &r.user_id == me) {
        SaleAction::Selling
    } else if requests.iter().filter(pending).any(|r| &r.user_id != me) {
        SaleAction::Purchase
    } else {
        SaleAction::Sell
    }
}

#[derive(Default)]
struct PollerState {
    thread: Option<ThreadId>,
    requests: Vec<SaleRequest>,
    /// Bumped on every start/stop; results from older loops are ignored.
    generation: u64,
}

pub struct SaleRequestPoller {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<PollerState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SaleRequestPoller {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(PollerState::default())),
            task: Mutex::new(None),
        }
    }

    pub fn thread(&self) -> Option<ThreadId> {
        lock(&self.state).thread.clone()
    }

    pub fn requests(&self) -> Vec<SaleRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn action(&self, me: &UserId) -> SaleAction {
        sale_action(&lock(&self.state).requests, me)
    }

    /// Poll `thread_id` until stopped or started on another thread. The
    /// first refresh happens immediately.
    pub fn start(&self, thread_id: ThreadId) {
        let mut task = lock(&self.task);
        let generation = {
            let mut state = lock(&self.state);
            let running = task.as_ref().is_some_and(|t| !t.is_finished());
            if running && state.thread.as_ref() == Some(&thread_id) {
                return;
            }
            state.generation += 1;
            state.thread = Some(thread_id.clone());
            state.requests.clear();
            state.generation
        };
        if let Some(previous) = task.take() {
            previous.abort();
        }

        info!(thread = %thread_id, "Sale-request polling started");
        let transport = self.transport.clone();
        let state = self.state.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(SALE_REQUEST_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = refresh(transport.as_ref(), &state, &thread_id, generation).await {
                    warn!(thread = %thread_id, error = %e, "Sale-request refresh failed");
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        let mut state = lock(&self.state);
        if let Some(thread) = state.thread.take() {
            debug!(thread = %thread, "Sale-request polling stopped");
        }
        state.generation += 1;
        state.requests.clear();
    }

    /// Refresh outside the regular schedule.
    pub async fn refresh_now(&self) -> Result<()> {
        let (thread_id, generation) = {
            let state = lock(&self.state);
            (state.thread.clone().ok_or(ClientError::NoThread)?, state.generation)
        };
        refresh(self.transport.as_ref(), &self.state, &thread_id, generation).await
    }

    /// Open a sale request on the polled thread and refresh the list.
    pub async fn create_sale_request(
        &self,
        post_id: Option<&str>,
        price: i64,
        phone_number: Option<String>,
    ) -> Result<SaleRequest> {
        let post_id = post_id
            .filter(|p| !p.is_empty())
            .ok_or(ValidationError::MissingPost)?;
        if price <= 0 {
            return Err(ValidationError::InvalidPrice.into());
        }
        let thread_id = self.thread().ok_or(ClientError::NoThread)?;

        let request = CreateSaleRequest {
            thread_id,
            post_id: post_id.to_string(),
            price,
            phone_number: phone_number.filter(|p| !p.trim().is_empty()),
        };
        let created = self.transport.create_sale_request(&request).await?;
        info!(thread = %created.thread_id, sale_request = %created.id, price, "Sale request created");

        if let Err(e) = self.refresh_now().await {
            warn!(thread = %created.thread_id, error = %e, "Sale-request refresh after create failed");
        }
        Ok(created)
    }
}

impl Drop for SaleRequestPoller {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

async fn refresh(
    transport: &dyn Transport,
    state: &Mutex<PollerState>,
    thread_id: &ThreadId,
    generation: u64,
) -> Result<()> {
    let requests = transport.list_sale_requests(thread_id).await?;
    let mut state = lock(state);
    if state.generation == generation {
        state.requests = requests;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::sleep;

    use crate::testing::FakeBackend;

    fn poller(backend: &Arc<FakeBackend>) -> SaleRequestPoller {
        SaleRequestPoller::new(backend.session("u1"))
    }

    #[test]
    fn test_sale_action() {
        let me = UserId::from("u1");

        let mut requests: Vec<SaleRequest> = Vec::new();
        assert_eq!(sale_action(&requests, &me), SaleAction::Sell);

        let request = |user: &str, status| SaleRequest {
            id: "s1".into(),
            thread_id: "t1".into(),
            user_id: user.into(),
            post_id: "p1".into(),
            price: 500,
            phone_number: None,
            status,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        requests.push(request("u2", SaleRequestStatus::Completed));
        assert_eq!(sale_action(&requests, &me), SaleAction::Sell);
        requests.push(request("u2", SaleRequestStatus::Pending));
        assert_eq!(sale_action(&requests, &me), SaleAction::Purchase);
        requests.push(request("u1", SaleRequestStatus::Pending));
        assert_eq!(sale_action(&requests, &me), SaleAction::Selling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_fixed_interval() {
        let backend = FakeBackend::new();
        let poller = poller(&backend);

        poller.start("t1".into());
        sleep(Duration::from_millis(1)).await;
        assert_eq!(backend.calls("list_sale_requests"), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.calls("list_sale_requests"), 2);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls("list_sale_requests"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_tick_replaces_the_list() {
        let backend = FakeBackend::new();
        backend.add_sale_request("t1", "u2", SaleRequestStatus::Cancelled);
        let poller = poller(&backend);

        poller.start("t1".into());
        sleep(Duration::from_millis(1)).await;
        assert_eq!(poller.requests().len(), 1);
        assert_eq!(poller.action(&"u1".into()), SaleAction::Sell);

        backend.add_sale_request("t1", "u2", SaleRequestStatus::Pending);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(poller.requests().len(), 2);
        assert_eq!(poller.action(&"u1".into()), SaleAction::Purchase);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let backend = FakeBackend::new();
        backend.add_sale_request("t1", "u2", SaleRequestStatus::Pending);
        let poller = poller(&backend);

        poller.start("t1".into());
        sleep(Duration::from_millis(1)).await;
        poller.stop();
        sleep(Duration::from_secs(20)).await;

        assert_eq!(backend.calls("list_sale_requests"), 1);
        assert!(poller.requests().is_empty());
        assert!(poller.thread().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_threads_restarts() {
        let backend = FakeBackend::new();
        backend.add_sale_request("t1", "u2", SaleRequestStatus::Pending);
        backend.add_sale_request("t2", "u3", SaleRequestStatus::Completed);
        let poller = poller(&backend);

        poller.start("t1".into());
        poller.start("t1".into());
        sleep(Duration::from_millis(1)).await;
        assert_eq!(backend.calls("list_sale_requests"), 1);

        poller.start("t2".into());
        sleep(Duration::from_millis(1)).await;
        let requests = poller.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].thread_id.as_str(), "t2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_polling() {
        let backend = FakeBackend::new();
        backend.add_sale_request("t1", "u2", SaleRequestStatus::Pending);
        backend.fail_on("list_sale_requests");
        let poller = poller(&backend);

        poller.start("t1".into());
        sleep(Duration::from_millis(1)).await;
        assert!(poller.requests().is_empty());

        backend.recover("list_sale_requests");
        sleep(Duration::from_secs(5)).await;
        assert_eq!(poller.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_validates_then_refreshes() {
        let backend = FakeBackend::new();
        let poller = poller(&backend);
        poller.start("t1".into());
        sleep(Duration::from_millis(1)).await;

        let err = poller.create_sale_request(None, 1000, None).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(ValidationError::MissingPost)));
        let err = poller.create_sale_request(Some("p1"), 0, None).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(ValidationError::InvalidPrice)));
        assert_eq!(backend.calls("create_sale_request"), 0);

        let created = poller
            .create_sale_request(Some("p1"), 250_000, Some(" ".into()))
            .await
            .unwrap();
        assert!(created.phone_number.is_none());
        assert_eq!(poller.requests(), vec![created]);
        assert_eq!(poller.action(&"u1".into()), SaleAction::Selling);
    }

    #[tokio::test]
    async fn test_create_requires_a_thread() {
        let backend = FakeBackend::new();
        let poller = poller(&backend);
        let err = poller
            .create_sale_request(Some("p1"), 100, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoThread));
    }
}
