//! The capability used to change which image is displayed.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use crate::error::StoreError;
use crate::model::ImageInfo;

/// Who asked for an image switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectReason {
    /// The direction controller moving its own traversal forward
    Traversal,
    /// Any other navigation
    User,
}

/// Displays an image. Injected into the direction controller.
///
/// The returned future resolves once the image is shown; the controller
/// waits for it before accepting the next input.
pub trait ImageSelector {
    fn select_image(
        &self,
        image: &ImageInfo,
        reason: SelectReason,
    ) -> impl Future<Output = Result<(), StoreError>>;
}

impl<T: ImageSelector> ImageSelector for Rc<T> {
    fn select_image(
        &self,
        image: &ImageInfo,
        reason: SelectReason,
    ) -> impl Future<Output = Result<(), StoreError>> {
        (**self).select_image(image, reason)
    }
}

/// Selector without a display: remembers the requests it was given.
#[derive(Debug, Default)]
pub struct HeadlessSelector {
    history: RefCell<Vec<(ImageInfo, SelectReason)>>,
}

impl HeadlessSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently selected image.
    pub fn current(&self) -> Option<ImageInfo> {
        self.history.borrow().last().map(|(image, _)| image.clone())
    }

    /// Every request so far, oldest first.
    pub fn history(&self) -> Vec<(ImageInfo, SelectReason)> {
        self.history.borrow().clone()
    }
}

impl ImageSelector for HeadlessSelector {
    async fn select_image(&self, image: &ImageInfo, reason: SelectReason) -> Result<(), StoreError> {
        log::debug!("Selecting image {} ({:?})", image.id, reason);
        self.history.borrow_mut().push((image.clone(), reason));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_selector_records_requests() {
        let selector = HeadlessSelector::new();
        assert!(selector.current().is_none());
        let image = ImageInfo::new("a.png", "p", "side", 1);
        pollster::block_on(selector.select_image(&image, SelectReason::Traversal)).unwrap();
        assert_eq!(selector.current(), Some(image.clone()));
        assert_eq!(selector.history(), vec![(image, SelectReason::Traversal)]);
    }
}
