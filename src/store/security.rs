//! Security delegate hook points.
//!
//! The store never decides access on its own; every public operation asks
//! the delegate and propagates a denial unmodified. The delegate surface is
//! deliberately opaque: it sees the record type, the primary key tuple, and
//! nothing else about policy.

use lodestone_core::{RecordType, StoreError, Value};

/// Operations passed to [`SecurityDelegate::require_admin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOperation {
    ClearAll,
}

pub trait SecurityDelegate: Send + Sync {
    fn evaluate_list(
        &self,
        record_type: RecordType,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(), StoreError>;

    fn evaluate_get(&self, record_type: RecordType, pk: &[Value]) -> Result<(), StoreError>;

    fn evaluate_create(&self, record_type: RecordType, pk: &[Value]) -> Result<(), StoreError>;

    fn evaluate_update(&self, record_type: RecordType, pk: &[Value]) -> Result<(), StoreError>;

    fn evaluate_delete(&self, record_type: RecordType, pk: &[Value]) -> Result<(), StoreError>;

    fn require_admin(
        &self,
        operation: AdminOperation,
        record_type: RecordType,
    ) -> Result<(), StoreError>;
}

/// The default delegate: everything is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SecurityDelegate for AllowAll {
    fn evaluate_list(
        &self,
        _record_type: RecordType,
        _limit: Option<usize>,
        _offset: usize,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn evaluate_get(&self, _record_type: RecordType, _pk: &[Value]) -> Result<(), StoreError> {
        Ok(())
    }

    fn evaluate_create(&self, _record_type: RecordType, _pk: &[Value]) -> Result<(), StoreError> {
        Ok(())
    }

    fn evaluate_update(&self, _record_type: RecordType, _pk: &[Value]) -> Result<(), StoreError> {
        Ok(())
    }

    fn evaluate_delete(&self, _record_type: RecordType, _pk: &[Value]) -> Result<(), StoreError> {
        Ok(())
    }

    fn require_admin(
        &self,
        _operation: AdminOperation,
        _record_type: RecordType,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}
