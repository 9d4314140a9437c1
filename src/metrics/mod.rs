//! Error counters the core increments; scraping/serving them is the
//! embedding application's concern.

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::Registry;

lazy_static! {
    pub static ref STORE_GET_ERRORS: IntCounter =
        IntCounter::new("store_get_errors", "Transport failures during point and range reads")
            .expect("metric can not be created");
    pub static ref STORE_PUT_ERRORS: IntCounter =
        IntCounter::new("store_put_errors", "Transport failures during puts")
            .expect("metric can not be created");
    pub static ref STORE_TXN_ERRORS: IntCounter =
        IntCounter::new("store_txn_errors", "Transport failures during transactions")
            .expect("metric can not be created");
    pub static ref CACHE_DISK_READ_ERRORS: IntCounter =
        IntCounter::new("cache_disk_read_errors", "Shadow cache file open/decode failures")
            .expect("metric can not be created");
    pub static ref CACHE_DISK_WRITE_ERRORS: IntCounter =
        IntCounter::new("cache_disk_write_errors", "Shadow cache file write failures")
            .expect("metric can not be created");
    pub static ref CUSTOM_REGISTRY: Registry =
        Registry::new_custom(Some("metakv".to_string()), None).unwrap();
}

/// Registers the store's counters with `registry`.
pub fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(STORE_GET_ERRORS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(STORE_PUT_ERRORS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(STORE_TXN_ERRORS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(CACHE_DISK_READ_ERRORS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(CACHE_DISK_WRITE_ERRORS.clone()))
        .expect("collector can be registered");
}
