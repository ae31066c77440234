//! Per-image traversal: every record of the open image lacking a direction.

use std::collections::VecDeque;

use super::mode::Progress;
use crate::model::{AnnotationIdentity, AnnotationRecord, ImageInfo};

/// Work queue of one image's records without a direction.
#[derive(Debug, Clone, PartialEq)]
pub struct LongitudinalQueue {
    image: ImageInfo,
    pending: VecDeque<AnnotationIdentity>,
    total: usize,
    completed: usize,
}

impl LongitudinalQueue {
    /// Collect the records lacking a direction, in ascending order.
    pub fn from_records(image: ImageInfo, records: &[AnnotationRecord]) -> Self {
        let mut pending: Vec<AnnotationIdentity> = records
            .iter()
            .filter(|r| r.lacks_direction())
            .map(AnnotationRecord::identity)
            .collect();
        pending.sort();
        pending.dedup();
        let total = pending.len();
        Self {
            image,
            pending: pending.into(),
            total,
            completed: 0,
        }
    }

    pub fn image(&self) -> &ImageInfo {
        &self.image
    }

    /// The record currently awaiting a click.
    pub fn head(&self) -> Option<&AnnotationIdentity> {
        self.pending.front()
    }

    /// Mark the head as done.
    pub fn complete_head(&mut self) -> Option<AnnotationIdentity> {
        let done = self.pending.pop_front()?;
        self.completed += 1;
        Some(done)
    }

    /// Drop the head without counting it, e.g. when the record vanished.
    pub fn skip_head(&mut self) -> Option<AnnotationIdentity> {
        self.pending.pop_front()
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn progress(&self) -> Progress {
        Progress::Longitudinal {
            completed: self.completed,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, Point, RecordOrigin};

    fn record(order: u32, with_direction: bool) -> AnnotationRecord {
        let mut rec = AnnotationRecord::new(
            u64::from(order),
            AnnotationIdentity::regular(order),
            Point::new(0.0, 0.0),
            1,
            RecordOrigin::User,
        );
        if with_direction {
            rec.set_directions(vec![Direction::from_click(rec.position, Point::new(1.0, 1.0))])
                .unwrap();
        }
        rec
    }

    #[test]
    fn test_queue_is_sorted_and_filtered() {
        let image = ImageInfo::new("a", "p", "side", 0);
        let records = [record(4, false), record(1, false), record(2, true), record(3, false)];
        let mut queue = LongitudinalQueue::from_records(image, &records);
        assert_eq!(queue.remaining(), 3);
        assert_eq!(queue.head(), Some(&AnnotationIdentity::regular(1)));

        queue.complete_head();
        assert_eq!(queue.head(), Some(&AnnotationIdentity::regular(3)));
        queue.skip_head();
        queue.complete_head();
        assert!(queue.is_exhausted());
        assert_eq!(
            queue.progress(),
            Progress::Longitudinal {
                completed: 2,
                total: 3
            }
        );
    }

    #[test]
    fn test_custom_kinds_follow_regular_of_same_order() {
        let image = ImageInfo::new("a", "p", "side", 0);
        let mut custom = record(1, false);
        custom.kind = crate::model::AnnotationKind::Custom("stem".into());
        let queue = LongitudinalQueue::from_records(image, &[custom, record(2, false), record(1, false)]);
        let order: Vec<_> = queue.pending.iter().cloned().collect();
        assert_eq!(
            order,
            vec![
                AnnotationIdentity::regular(1),
                AnnotationIdentity::custom(1, "stem"),
                AnnotationIdentity::regular(2),
            ]
        );
    }
}
