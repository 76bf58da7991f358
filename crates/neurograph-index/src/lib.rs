pub mod chunks;
pub mod idmap;
pub mod inverted;
pub mod text;

pub use chunks::{flush_idmap, load_idmap, BitmapChunk};
pub use idmap::IdMap;
pub use inverted::{
    bucket_value, is_temporal_field, FieldFilter, IndexKey, MetadataIndex, RangeHits,
    BUCKET_MILLIS,
};
pub use text::{hash_word, tokenize};
