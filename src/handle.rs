//! The rendering-surface collaborator.
//!
//! The host's UI layer owns the decode/render surface of each visible feed
//! cell and hands the engine a [`RenderingHandle`] to it. The engine never
//! constructs one; it only attaches, detaches and drives them.

use std::sync::Arc;

use async_trait::async_trait;

/// Failure reported by [`RenderingHandle::play`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayError {
    /// Stream or decoder hiccup; playing again later may succeed.
    #[error("playback failed: {0}")]
    Transient(String),

    /// The platform destroyed the underlying surface. The handle is unusable
    /// and the host must attach a fresh one.
    #[error("rendering surface lost: {0}")]
    SurfaceLost(String),
}

impl PlayError {
    pub fn is_surface_lost(&self) -> bool {
        matches!(self, PlayError::SurfaceLost(_))
    }

    /// Classify a bare platform error message.
    ///
    /// Only for hosts whose player reports failures as strings. The patterns
    /// below match the messages mobile players emit when their surface or
    /// decoder was torn down underneath them; anything else is transient.
    pub fn from_platform_message(message: impl Into<String>) -> Self {
        const SURFACE_LOST_PATTERNS: &[&str] = &[
            "surface was released",
            "surface has been released",
            "surface lost",
            "player has been released",
            "player was released",
            "mediacodec released",
            "invalid surface",
            "view was deallocated",
        ];

        let message = message.into();
        let lowered = message.to_ascii_lowercase();
        if SURFACE_LOST_PATTERNS.iter().any(|p| lowered.contains(p)) {
            PlayError::SurfaceLost(message)
        } else {
            PlayError::Transient(message)
        }
    }
}

/// Stateful handle to a host-owned decode/render surface.
///
/// `pause` and `release` must be cheap and must tolerate being called on a
/// handle that is already paused or released.
#[async_trait]
pub trait RenderingHandle: Send + Sync {
    /// Start or resume playback. Resolves once the surface reports that it is
    /// playing, or with the reason it could not.
    async fn play(&self) -> Result<(), PlayError>;

    fn pause(&self);

    /// Free decoder and network resources held by the surface.
    fn release(&self);
}

/// Reference-counted handle as stored by the engine.
pub type SharedHandle = Arc<dyn RenderingHandle>;

/// Whether two references point at the same surface.
pub fn same_handle(a: &SharedHandle, b: &SharedHandle) -> bool {
    Arc::ptr_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl RenderingHandle for Noop {
        async fn play(&self) -> Result<(), PlayError> {
            Ok(())
        }
        fn pause(&self) {}
        fn release(&self) {}
    }

    #[test]
    fn classifies_surface_loss_messages() {
        let err = PlayError::from_platform_message("IllegalStateException: Surface was released");
        assert!(err.is_surface_lost());

        let err = PlayError::from_platform_message("HTTP 503 while loading segment");
        assert_eq!(err, PlayError::Transient("HTTP 503 while loading segment".into()));
    }

    #[test]
    fn display_includes_reason() {
        let err = PlayError::SurfaceLost("view gone".into());
        assert_eq!(err.to_string(), "rendering surface lost: view gone");
    }

    #[test]
    fn identity_is_by_pointer() {
        let a: SharedHandle = Arc::new(Noop);
        let b: SharedHandle = Arc::new(Noop);
        assert!(same_handle(&a, &a.clone()));
        assert!(!same_handle(&a, &b));
    }
}
