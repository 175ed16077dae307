//! Prefetch window computation.

use feedplay_core::{Priority, ScrollDirection};

/// Shape of the window around the active index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowShape {
    /// Indices in the scroll direction warmed at high priority.
    pub ahead: usize,
    /// Indices against the scroll direction warmed at medium priority.
    pub behind: usize,
}

impl Default for WindowShape {
    fn default() -> Self {
        Self {
            ahead: 2,
            behind: 1,
        }
    }
}

/// One index of the window and the priority it is warmed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSlot {
    pub index: usize,
    pub priority: Priority,
}

/// Build the priority-ordered candidate list around `active`.
///
/// The active index comes first, then the `ahead` indices in the scroll
/// direction (high), the `behind` indices against it (medium) and, on
/// unmetered connections only, one more index past the ahead tier (low).
/// `Unknown` direction is treated as scrolling down. Indices outside
/// `[0, feed_len)` are dropped.
pub fn compute(
    active: usize,
    direction: ScrollDirection,
    feed_len: usize,
    shape: WindowShape,
    unmetered: bool,
) -> Vec<WindowSlot> {
    let forward = !matches!(direction, ScrollDirection::Up);
    // Step `n` positions along (or against) the scroll direction.
    let step = |n: usize, along: bool| -> Option<usize> {
        if along == forward {
            active.checked_add(n)
        } else {
            active.checked_sub(n)
        }
    };

    let mut slots = vec![WindowSlot {
        index: active,
        priority: Priority::High,
    }];
    slots.extend((1..=shape.ahead).filter_map(|n| {
        step(n, true).map(|index| WindowSlot {
            index,
            priority: Priority::High,
        })
    }));
    slots.extend((1..=shape.behind).filter_map(|n| {
        step(n, false).map(|index| WindowSlot {
            index,
            priority: Priority::Medium,
        })
    }));
    if unmetered {
        if let Some(index) = step(shape.ahead + 1, true) {
            slots.push(WindowSlot {
                index,
                priority: Priority::Low,
            });
        }
    }

    slots.retain(|slot| slot.index < feed_len);
    slots
}

/// Indices kept alive around `active`: `[active - behind, active + ahead]`,
/// saturating at zero.
pub fn retention_range(active: usize, shape: WindowShape) -> std::ops::RangeInclusive<usize> {
    active.saturating_sub(shape.behind)..=active.saturating_add(shape.ahead)
}
