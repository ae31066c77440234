//! Data models for keypoint annotations.

mod annotation;
mod image;
mod legacy;

pub use annotation::{
    AnnotationIdentity, AnnotationKind, AnnotationRecord, Direction, LocalId, OperationKind, Point,
    RecordOrigin, directions_match, find_by_identity, next_local_id, normalize_angle,
};
pub use image::{ImageId, ImageInfo, SeriesKey};
pub use legacy::{LegacyDirection, decode_records, encode_records, normalize_directions};
