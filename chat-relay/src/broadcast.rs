use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tracing::debug;

use crate::{
    registry::Registry,
    session::{Session, SessionId},
};

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Fans payloads out to registered sessions.
///
/// A failed write only affects that recipient. The broadcaster never removes
/// anyone; the recipient's own handler notices the broken transport on its
/// next read.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    write_timeout: Option<Duration>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, write_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Delivers `payload` to every registered session except `exclude`.
    pub async fn deliver(&self, payload: &[u8], exclude: Option<SessionId>) -> Delivery {
        let recipients = self.registry.snapshot();
        self.deliver_to(&recipients, payload, exclude).await
    }

    /// Delivers `payload` to an explicit recipient list.
    pub async fn deliver_to(
        &self,
        recipients: &[Arc<Session>],
        payload: &[u8],
        exclude: Option<SessionId>,
    ) -> Delivery {
        let mut delivery = Delivery::default();

        let targets: Vec<&Arc<Session>> = recipients
            .iter()
            .filter(|session| Some(session.id()) != exclude)
            .filter(|session| {
                let alive = session.is_alive();
                if !alive {
                    delivery.skipped += 1;
                }
                alive
            })
            .collect();

        let writes = targets.iter().map(|session| async move {
            let result = session.send(payload, self.write_timeout).await;
            (session, result)
        });

        for (session, result) in join_all(writes).await {
            match result {
                Ok(()) => delivery.delivered += 1,
                Err(err) => {
                    delivery.failed += 1;
                    debug!(
                        session = %session.id(),
                        name = %session.name(),
                        error = ?err,
                        "failed to deliver message"
                    );
                }
            }
        }

        delivery
    }
}
