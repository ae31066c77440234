//! Shared fixtures for the integration tests.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::StoreError;
use crate::model::{
    AnnotationIdentity, AnnotationRecord, Direction, ImageId, ImageInfo, Point, RecordOrigin,
};
use crate::series::ImageCatalog;
use crate::store::{AnnotationStore, MemoryStore};

/// Route engine logs through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

/// `I1..=In` of plant "p1", side view, captured in id order.
pub fn series(n: usize) -> Vec<ImageInfo> {
    (1..=n)
        .map(|i| ImageInfo::new(format!("I{}", i), "p1", "side", i as i64 * 1000))
        .collect()
}

pub fn catalog(images: &[ImageInfo]) -> Rc<ImageCatalog> {
    Rc::new(ImageCatalog::with_images(images.iter().cloned()))
}

/// A user record without directions.
pub fn record(order: u32, x: f32, y: f32) -> AnnotationRecord {
    AnnotationRecord::new(
        u64::from(order),
        AnnotationIdentity::regular(order),
        Point::new(x, y),
        1,
        RecordOrigin::User,
    )
}

/// A record that already points right.
pub fn record_with_direction(order: u32, x: f32, y: f32) -> AnnotationRecord {
    let mut rec = record(order, x, y);
    let dir = Direction::from_click(rec.position, Point::new(x + 10.0, y));
    rec.set_directions(vec![dir])
        .expect("single direction fits");
    rec
}

/// Resolves once the shared flag is set.
struct Gate<'a>(&'a Cell<bool>);

impl Future for Gate<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.0.get() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Memory store whose saves can be made to fail or to hang per image.
#[derive(Debug, Default)]
pub struct TestStore {
    inner: MemoryStore,
    failing: RefCell<HashSet<ImageId>>,
    gated: RefCell<HashSet<ImageId>>,
    released: Cell<bool>,
    saves: Cell<usize>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn insert(&self, image: &ImageInfo, records: &[AnnotationRecord]) {
        self.inner
            .insert(image, records)
            .expect("fixture records encode");
    }

    pub fn records(&self, image: &ImageInfo) -> Vec<AnnotationRecord> {
        self.inner.records(image).expect("stored records decode")
    }

    pub fn record(&self, image: &ImageInfo, identity: &AnnotationIdentity) -> Option<AnnotationRecord> {
        self.records(image)
            .into_iter()
            .find(|r| r.has_identity(identity))
    }

    /// Make saves to `image` fail until [`TestStore::heal`].
    pub fn fail_saves(&self, image: &ImageInfo) {
        self.failing.borrow_mut().insert(image.id.clone());
    }

    pub fn heal(&self, image: &ImageInfo) {
        self.failing.borrow_mut().remove(&image.id);
    }

    /// Make saves to `image` hang until [`TestStore::release`].
    pub fn gate(&self, image: &ImageInfo) {
        self.released.set(false);
        self.gated.borrow_mut().insert(image.id.clone());
    }

    pub fn release(&self) {
        self.released.set(true);
    }

    /// Successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves.get()
    }
}

impl AnnotationStore for TestStore {
    async fn load(&self, image: &ImageInfo) -> Result<Option<Vec<AnnotationRecord>>, StoreError> {
        self.inner.load(image).await
    }

    async fn save(&self, image: &ImageInfo, records: &[AnnotationRecord]) -> Result<(), StoreError> {
        let gated = self.gated.borrow().contains(&image.id);
        if gated {
            Gate(&self.released).await;
        }
        if self.failing.borrow().contains(&image.id) {
            return Err(StoreError::io(image.id.clone(), "disk full"));
        }
        self.inner.save(image, records).await?;
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}
