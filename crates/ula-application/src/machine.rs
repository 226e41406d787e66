//! Generic state-machine runner.
//!
//! A machine is driven by a single task that owns it: events are queued on an
//! unbounded channel and handled strictly one after another, so the guard and
//! the handler for one event finish before the next event is looked at.
//! States are published through a `watch` channel (latest value wins, new
//! observers see the current value right away).

use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A closed-state machine whose current state is observable.
#[async_trait]
pub trait StateMachine: Send + 'static {
    type Event: Debug + Send + 'static;
    type State: Clone + Debug + Send + Sync + 'static;

    /// Evaluates the guard for `event` and, if it passes, runs its handler.
    ///
    /// Never fails: every error is turned into a state.
    async fn handle_event(&mut self, event: Self::Event);

    /// Subscribes to state changes.
    fn subscribe(&self) -> watch::Receiver<Self::State>;
}

/// Handle to a machine running on its own task.
pub struct FsmHandle<E, S> {
    events: mpsc::UnboundedSender<E>,
    state: watch::Receiver<S>,
    task: JoinHandle<()>,
}

impl<E, S> FsmHandle<E, S>
where
    E: Debug + Send + 'static,
    S: Clone + Debug + Send + Sync + 'static,
{
    /// Moves `machine` onto a new task and returns a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<M>(mut machine: M) -> Self
    where
        M: StateMachine<Event = E, State = S>,
    {
        let (events, mut event_rx) = mpsc::unbounded_channel::<E>();
        let state = machine.subscribe();

        let task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                machine.handle_event(event).await;
            }
            tracing::debug!("State machine event channel closed, runner exiting");
        });

        Self {
            events,
            state,
            task,
        }
    }

    /// Queues an event. Returns immediately; the event is handled in order.
    pub fn submit_event(&self, event: E) {
        if let Err(err) = self.events.send(event) {
            tracing::warn!("State machine runner has stopped, dropping {:?}", err.0);
        }
    }

    /// Returns a receiver holding the current state.
    pub fn observe_state(&self) -> watch::Receiver<S> {
        self.state.clone()
    }

    /// The most recently published state.
    pub fn current_state(&self) -> S {
        self.state.borrow().clone()
    }
}

impl<E, S> Drop for FsmHandle<E, S> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
