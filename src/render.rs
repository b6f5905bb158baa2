//! Display callback and the toast renderer behind it.
//!
//! Each shown payload becomes one [`Toast`]: inserted into a [`Page`]
//! immediately and removed by its own timer after the visible duration plus
//! a grace period. Timers are independent, so overlapping toasts never
//! shorten or extend each other.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::{ToastConfig, ToastPosition};

/// Receives every notification payload the channel delivers.
pub trait Renderer: Send + Sync {
    fn show(&self, payload: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToastStyle {
    pub background: String,
    pub color: String,
    pub text_align: String,
}

/// One rendered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub id: Uuid,
    pub text: String,
    pub position: ToastPosition,
    pub duration_ms: u64,
    pub style: ToastStyle,
}

/// Where toasts live while visible.
pub trait Page: Send + Sync + 'static {
    fn insert(&self, toast: &Toast);
    fn remove(&self, id: Uuid);
}

// =============================================================================
// TOAST RENDERER
// =============================================================================

pub struct ToastRenderer<P: Page> {
    page: Arc<P>,
    config: ToastConfig,
}

impl<P: Page> ToastRenderer<P> {
    #[must_use]
    pub fn new(page: Arc<P>, config: ToastConfig) -> Self {
        Self { page, config }
    }

    #[must_use]
    pub fn page(&self) -> &Arc<P> {
        &self.page
    }

    /// Toast for a payload with the configured presentation.
    #[must_use]
    pub fn build(&self, payload: &str) -> Toast {
        Toast {
            id: Uuid::new_v4(),
            text: payload.to_owned(),
            position: self.config.position,
            duration_ms: u64::try_from(self.config.duration.as_millis()).unwrap_or(u64::MAX),
            style: ToastStyle {
                background: self.config.background.clone(),
                color: self.config.color.clone(),
                text_align: "center".to_owned(),
            },
        }
    }
}

impl<P: Page> Renderer for ToastRenderer<P> {
    fn show(&self, payload: &str) {
        let toast = self.build(payload);
        self.page.insert(&toast);
        debug!(id = %toast.id, "toast: shown");
        schedule_removal(Arc::clone(&self.page), toast.id, self.config.removal_delay());
    }
}

/// Remove `id` from `page` after `delay`.
///
/// Runs on the ambient tokio runtime when there is one, otherwise on a
/// dedicated thread.
fn schedule_removal<P: Page>(page: Arc<P>, id: Uuid, delay: Duration) {
    let remove = move || {
        page.remove(id);
        debug!(%id, "toast: removed");
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                remove();
            });
        }
        Err(_) => {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                remove();
            });
        }
    }
}

// =============================================================================
// MEMORY PAGE
// =============================================================================

/// Page that keeps live toasts in insertion order.
#[derive(Debug, Default)]
pub struct MemoryPage {
    toasts: Mutex<Vec<Toast>>,
}

impl MemoryPage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn live(&self) -> Vec<Toast> {
        self.toasts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.toasts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Page for MemoryPage {
    fn insert(&self, toast: &Toast) {
        self.toasts.lock().unwrap_or_else(PoisonError::into_inner).push(toast.clone());
    }

    fn remove(&self, id: Uuid) {
        self.toasts.lock().unwrap_or_else(PoisonError::into_inner).retain(|t| t.id != id);
    }
}

#[cfg(test)]
#[path = "render_test.rs"]
mod tests;
