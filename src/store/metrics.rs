//! Metrics delegate hook points.
//!
//! Every facade operation reports its outcome and duration through this
//! delegate. The default implementation drops everything on the floor.

use std::time::Duration;

use lodestone_core::RecordType;

pub trait MetricsDelegate: Send + Sync {
    fn did_fetch(&self, record_type: RecordType, count: usize, elapsed: Duration);
    fn did_save(&self, record_type: RecordType, count: usize, elapsed: Duration);
    fn did_delete(&self, record_type: RecordType, count: usize, elapsed: Duration);
    fn did_batch(&self, record_type: RecordType, count: usize, elapsed: Duration);

    fn did_fail_fetch(&self, record_type: RecordType, elapsed: Duration);
    fn did_fail_save(&self, record_type: RecordType, elapsed: Duration);
    fn did_fail_delete(&self, record_type: RecordType, elapsed: Duration);
    fn did_fail_batch(&self, record_type: RecordType, elapsed: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsDelegate for NoopMetrics {
    fn did_fetch(&self, _record_type: RecordType, _count: usize, _elapsed: Duration) {}
    fn did_save(&self, _record_type: RecordType, _count: usize, _elapsed: Duration) {}
    fn did_delete(&self, _record_type: RecordType, _count: usize, _elapsed: Duration) {}
    fn did_batch(&self, _record_type: RecordType, _count: usize, _elapsed: Duration) {}

    fn did_fail_fetch(&self, _record_type: RecordType, _elapsed: Duration) {}
    fn did_fail_save(&self, _record_type: RecordType, _elapsed: Duration) {}
    fn did_fail_delete(&self, _record_type: RecordType, _elapsed: Duration) {}
    fn did_fail_batch(&self, _record_type: RecordType, _elapsed: Duration) {}
}
