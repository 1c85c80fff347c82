pub mod cache;

pub use cache::{
    cache_clean, cache_find, cache_list, cache_remove, cache_store, CacheCleanRequest,
    CacheFindRequest, CacheListRequest, CacheRemoveRequest, CacheStoreRequest,
};
