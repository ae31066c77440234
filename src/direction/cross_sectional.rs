//! Per-order traversal across every image of a time series.
//!
//! The plan is a snapshot taken at entry: orders are visited in ascending
//! order, and within an order the images are visited in series order. The
//! cursor only moves forward; pausing leaves it untouched.

use std::collections::BTreeMap;

use super::mode::Progress;
use crate::model::{AnnotationIdentity, AnnotationRecord, ImageInfo, SeriesKey};
use crate::series::TimeSeriesIndex;

/// A record lacking a direction on one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub image: ImageInfo,
    pub identity: AnnotationIdentity,
}

/// Every occurrence of one order, in series order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderGroup {
    pub order: u32,
    pub occurrences: Vec<Occurrence>,
}

/// Position of the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub order_index: usize,
    pub image_index: usize,
}

/// Traversal sequence and cursor of a cross-sectional session.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossSectionalPlan {
    series: SeriesKey,
    fingerprint: u64,
    groups: Vec<OrderGroup>,
    cursor: Cursor,
    total: usize,
    completed: usize,
    paused: bool,
}

impl CrossSectionalPlan {
    /// Build the plan from every image of the series and its records.
    ///
    /// `records` yields `(image, records)` pairs; images are ordered by their
    /// position in `index`, whatever order they arrive in.
    pub fn build<'a>(
        index: &TimeSeriesIndex,
        records: impl IntoIterator<Item = (&'a ImageInfo, &'a [AnnotationRecord])>,
    ) -> Self {
        let mut by_order: BTreeMap<u32, Vec<(usize, Occurrence)>> = BTreeMap::new();
        for (image, list) in records {
            let Some(position) = index.position_of(&image.id) else {
                continue;
            };
            for record in list.iter().filter(|r| r.lacks_direction()) {
                by_order.entry(record.order).or_default().push((
                    position,
                    Occurrence {
                        image: image.clone(),
                        identity: record.identity(),
                    },
                ));
            }
        }

        let groups: Vec<OrderGroup> = by_order
            .into_iter()
            .map(|(order, mut occurrences)| {
                occurrences.sort_by(|(pa, a), (pb, b)| {
                    pa.cmp(pb).then_with(|| a.identity.cmp(&b.identity))
                });
                occurrences.dedup_by(|(pa, a), (pb, b)| pa == pb && a.identity == b.identity);
                OrderGroup {
                    order,
                    occurrences: occurrences.into_iter().map(|(_, occ)| occ).collect(),
                }
            })
            .collect();

        let total = groups.iter().map(|g| g.occurrences.len()).sum();
        Self {
            series: index.key().clone(),
            fingerprint: index.fingerprint(),
            groups,
            cursor: Cursor::default(),
            total,
            completed: 0,
            paused: false,
        }
    }

    pub fn series(&self) -> &SeriesKey {
        &self.series
    }

    /// Fingerprint of the series at entry.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn groups(&self) -> &[OrderGroup] {
        &self.groups
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Occurrence under the cursor, `None` once finished.
    pub fn current(&self) -> Option<&Occurrence> {
        self.groups
            .get(self.cursor.order_index)?
            .occurrences
            .get(self.cursor.image_index)
    }

    /// Image of the next occurrence of the current identity on a later
    /// image, if any. Other kinds sharing the order are passed over.
    pub fn next_in_order(&self) -> Option<&ImageInfo> {
        let current = self.current()?;
        self.groups
            .get(self.cursor.order_index)?
            .occurrences
            .iter()
            .skip(self.cursor.image_index + 1)
            .find(|occ| occ.identity == current.identity && occ.image.id != current.image.id)
            .map(|occ| &occ.image)
    }

    /// Mark the current occurrence done and move the cursor.
    pub fn complete_current(&mut self) {
        if self.current().is_some() {
            self.completed += 1;
        }
        self.advance();
    }

    /// Move past the current occurrence without counting it.
    pub fn skip_current(&mut self) {
        self.advance();
    }

    fn advance(&mut self) {
        let Some(group) = self.groups.get(self.cursor.order_index) else {
            return;
        };
        self.cursor.image_index += 1;
        if self.cursor.image_index >= group.occurrences.len() {
            self.cursor.image_index = 0;
            self.cursor.order_index += 1;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.order_index >= self.groups.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn unpause(&mut self) {
        self.paused = false;
    }

    pub fn total_orders(&self) -> usize {
        self.groups.len()
    }

    pub fn progress(&self) -> Progress {
        let total_orders = self.groups.len();
        Progress::CrossSectional {
            completed: self.completed,
            total: self.total,
            current_order: (self.cursor.order_index + 1).min(total_orders),
            total_orders,
            order: self.groups.get(self.cursor.order_index).map(|g| g.order),
        }
    }
}
