// Push subscription lifecycle. At most one subscription is open at a
// time, always scoped to the active target; teardown happens before any
// new setup, and every continuation is gated on the generation token so
// a superseded target can never mutate store state.

use super::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SubPhase {
    Idle,
    Resolving,
    Subscribing,
    Active,
    Unresolved,
    TornDown,
}

impl EngineCore {
    /// Invalidate the previous subscription's callbacks and close it.
    /// Bumping the token first guarantees no late event can land after
    /// teardown begins.
    pub(super) fn teardown_subscription(&mut self) {
        self.sub_token = self.sub_token.wrapping_add(1);
        self.sub_phase = SubPhase::TornDown;
        self.state.live = LiveStatus::Idle;
        if let Some(handle) = self.sub_handle.take() {
            let push = self.services.push.clone();
            self.runtime.spawn(async move {
                if let Err(e) = push.unsubscribe(handle).await {
                    tracing::warn!(%e, "unsubscribe failed");
                }
            });
        }
    }

    pub(super) fn open_subscription(&mut self, filter: PushFilter) {
        let token = self.sub_token;
        self.sub_phase = SubPhase::Subscribing;
        self.state.live = LiveStatus::Connecting;
        tracing::info!(?filter, "opening subscription");

        // Forwarder: tags every inbound payload with the generation it was
        // subscribed under, then hands it to the actor. Ends when the
        // service drops its sender.
        let (event_tx, event_rx) = flume::unbounded::<serde_json::Value>();
        let core_tx = self.core_tx.clone();
        self.runtime.spawn(async move {
            while let Ok(payload) = event_rx.recv_async().await {
                let forwarded = core_tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::PushEventReceived { token, payload },
                )));
                if forwarded.is_err() {
                    break;
                }
            }
        });

        let push = self.services.push.clone();
        let tx = self.core_tx.clone();
        self.runtime.spawn(async move {
            let result = push.subscribe(filter, event_tx).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::SubscriptionOpened { token, result },
            )));
        });
    }

    pub(super) fn handle_subscription_opened(
        &mut self,
        token: u64,
        result: Result<PushHandle, ServiceError>,
    ) {
        if token != self.sub_token {
            // The target changed while the subscription was opening; if it
            // did open, close it again.
            if let Ok(handle) = result {
                tracing::debug!(handle = handle.0, "closing subscription for superseded target");
                let push = self.services.push.clone();
                self.runtime.spawn(async move {
                    let _ = push.unsubscribe(handle).await;
                });
            }
            return;
        }
        match result {
            Ok(handle) => {
                self.sub_handle = Some(handle);
                self.sub_phase = SubPhase::Active;
                self.state.live = LiveStatus::Live;
                self.emit_state();
            }
            Err(e) => {
                tracing::warn!(%e, "subscription failed, live updates unavailable");
                self.sub_phase = SubPhase::Idle;
                self.state.live = LiveStatus::Degraded;
                self.emit_state();
            }
        }
    }
}
