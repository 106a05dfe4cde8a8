//! Applies remote operations to the local canvas under last-writer-wins.
//!
//! Conflict resolution is per element on `version` only. There is no causal
//! ordering: a local edit made a moment ago can be overwritten by a remote
//! edit to the same element that carries a slightly newer stamp. That is an
//! accepted outcome for a visual canvas.

use crate::canvas::Canvas;
use crate::ops::{Operation, OperationKind};
use crate::version::supersedes;

/// Why an operation left the canvas unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by the local user; already applied through the local edit path.
    SelfOrigin,
    /// `add` for an id that already exists.
    Duplicate,
    /// `update`/`delete` for an id that doesn't exist.
    MissingTarget,
    /// `update` older than the stored version.
    Stale,
    /// `reorder` that didn't change the order.
    Unchanged,
}

/// Outcome of [`apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedResult {
    Applied,
    Ignored(IgnoreReason),
}

impl AppliedResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, AppliedResult::Applied)
    }
}

/// Apply a remote operation to `canvas`.
///
/// Every applied operation schedules a render; the scheduler coalesces them
/// to one repaint per frame.
pub fn apply(op: &Operation, local_user: &str, canvas: &mut Canvas) -> AppliedResult {
    if op.user_id == local_user {
        return AppliedResult::Ignored(IgnoreReason::SelfOrigin);
    }
    replay(op, canvas)
}

/// Apply an operation regardless of who sent it, under the same rules as
/// [`apply`]. Used to put queued local edits back on a reloaded document.
pub fn replay(op: &Operation, canvas: &mut Canvas) -> AppliedResult {
    let result = match &op.kind {
        OperationKind::Add { element } => {
            if canvas.document.add_element(element.clone()) {
                AppliedResult::Applied
            } else {
                AppliedResult::Ignored(IgnoreReason::Duplicate)
            }
        }
        OperationKind::Update {
            element_id,
            changes,
            version,
        } => match canvas.document.get_mut(*element_id) {
            None => AppliedResult::Ignored(IgnoreReason::MissingTarget),
            Some(element) if !supersedes(*version, element.version) => {
                AppliedResult::Ignored(IgnoreReason::Stale)
            }
            Some(element) => {
                element.apply_patch(changes);
                element.version = *version;
                AppliedResult::Applied
            }
        },
        OperationKind::Delete { element_id } => match canvas.remove(*element_id) {
            Some(_) => AppliedResult::Applied,
            None => AppliedResult::Ignored(IgnoreReason::MissingTarget),
        },
        OperationKind::Reorder { element_ids } => {
            if canvas.document.reorder_subset(element_ids) {
                AppliedResult::Applied
            } else {
                AppliedResult::Ignored(IgnoreReason::Unchanged)
            }
        }
    };

    match result {
        AppliedResult::Applied => {
            log::debug!(
                "Applied {} from {} at {}",
                op.kind.type_name(),
                op.user_id,
                op.ts
            );
            canvas.render.request();
        }
        AppliedResult::Ignored(reason) => {
            log::debug!(
                "Ignored {} from {}: {:?}",
                op.kind.type_name(),
                op.user_id,
                reason
            );
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, ElementPatch};
    use kurbo::Point;
    use uuid::Uuid;

    const ME: &str = "me";
    const PEER: &str = "peer";

    fn op(kind: OperationKind) -> Operation {
        Operation::new(PEER, 1, kind)
    }

    fn canvas_with(element: &Element) -> Canvas {
        let mut canvas = Canvas::new();
        canvas.document.add_element(element.clone());
        canvas
    }

    fn update(id: Uuid, width: f64, version: u64) -> Operation {
        op(OperationKind::Update {
            element_id: id,
            changes: ElementPatch {
                width: Some(width),
                ..ElementPatch::default()
            },
            version,
        })
    }

    #[test]
    fn test_ignores_self_origin() {
        let el = Element::rectangle(Point::ZERO, 1.0, 1.0);
        let mut canvas = Canvas::new();
        let own = Operation::new(ME, 1, OperationKind::Add { element: el });
        assert_eq!(
            apply(&own, ME, &mut canvas),
            AppliedResult::Ignored(IgnoreReason::SelfOrigin)
        );
        assert!(canvas.document.is_empty());
        assert!(!canvas.render.is_pending());
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut el = Element::rectangle(Point::ZERO, 1.0, 1.0);
        el.version = 9;
        let add = op(OperationKind::Add { element: el.clone() });
        let mut canvas = Canvas::new();

        assert!(apply(&add, ME, &mut canvas).is_applied());
        let once = canvas.document.clone();
        assert_eq!(
            apply(&add, ME, &mut canvas),
            AppliedResult::Ignored(IgnoreReason::Duplicate)
        );
        assert_eq!(canvas.document, once);
        assert_eq!(canvas.document.len(), 1);
        assert_eq!(canvas.document.get(el.id).unwrap().version, 9);
    }

    #[test]
    fn test_lww_converges_in_either_order() {
        let mut el = Element::rectangle(Point::ZERO, 1.0, 1.0);
        el.version = 1;
        let v1 = update(el.id, 10.0, 5);
        let v2 = update(el.id, 20.0, 8);

        let mut forward = canvas_with(&el);
        apply(&v1, ME, &mut forward);
        apply(&v2, ME, &mut forward);

        let mut backward = canvas_with(&el);
        apply(&v2, ME, &mut backward);
        assert_eq!(
            apply(&v1, ME, &mut backward),
            AppliedResult::Ignored(IgnoreReason::Stale)
        );

        for canvas in [&forward, &backward] {
            let result = canvas.document.get(el.id).unwrap();
            assert_eq!(result.width, 20.0);
            assert_eq!(result.version, 8);
        }
        assert_eq!(forward.document.z_order(), backward.document.z_order());
        assert_eq!(forward.document.to_elements(), backward.document.to_elements());
    }

    #[test]
    fn test_update_tie_goes_to_remote() {
        let mut el = Element::rectangle(Point::ZERO, 1.0, 1.0);
        el.version = 4;
        let mut canvas = canvas_with(&el);
        assert!(apply(&update(el.id, 7.0, 4), ME, &mut canvas).is_applied());
        assert_eq!(canvas.document.get(el.id).unwrap().width, 7.0);
    }

    #[test]
    fn test_update_missing_target() {
        let mut canvas = Canvas::new();
        assert_eq!(
            apply(&update(Uuid::new_v4(), 1.0, 1), ME, &mut canvas),
            AppliedResult::Ignored(IgnoreReason::MissingTarget)
        );
    }

    #[test]
    fn test_delete_removes_from_selection() {
        let el = Element::rectangle(Point::ZERO, 1.0, 1.0);
        let mut canvas = canvas_with(&el);
        canvas.select(el.id);

        let result = apply(&op(OperationKind::Delete { element_id: el.id }), ME, &mut canvas);
        assert!(result.is_applied());
        assert!(canvas.document.is_empty());
        assert!(!canvas.is_selected(el.id));
        assert!(canvas.render.is_pending());
    }

    #[test]
    fn test_reorder_partial_preservation() {
        let mut canvas = Canvas::new();
        let ids: Vec<Uuid> = (0..5)
            .map(|_| {
                let el = Element::rectangle(Point::ZERO, 1.0, 1.0);
                let id = el.id;
                canvas.document.add_element(el);
                id
            })
            .collect();
        let (a, b, c, d, e) = (ids[0], ids[1], ids[2], ids[3], ids[4]);

        let reorder = op(OperationKind::Reorder { element_ids: vec![c, a] });
        assert!(apply(&reorder, ME, &mut canvas).is_applied());
        assert_eq!(canvas.document.z_order(), &[c, a, b, d, e]);
        assert_eq!(
            apply(&reorder, ME, &mut canvas),
            AppliedResult::Ignored(IgnoreReason::Unchanged)
        );
    }

    #[test]
    fn test_many_applies_one_render() {
        let mut canvas = Canvas::new();
        for _ in 0..3 {
            let el = Element::rectangle(Point::ZERO, 1.0, 1.0);
            apply(&op(OperationKind::Add { element: el }), ME, &mut canvas);
        }
        assert!(canvas.begin_frame());
        assert!(!canvas.begin_frame());
    }
}
