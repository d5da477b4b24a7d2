//! Request registry (spec §4.4)
//!
//! A per-session table of in-flight requests keyed by sequence number,
//! plus a secondary index by endpoint for bulk cancellation. A single
//! mutex is the synchronization point between the reader task, the
//! submit path, and the cancellation path; no operation holds the lock
//! across I/O (spec §5).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::endpoint::EndpointKey;

/// Terminal status a request completes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Ok,
    Error(i32),
    Cancelled,
    Stalled,
}

/// Lifecycle status of a request while it is still in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    /// A CMD_UNLINK has been sent for this request; `unlink_seqnum` is
    /// the seqnum that UNLINK was assigned (distinct from this
    /// request's own seqnum, per spec §3).
    Cancelling { unlink_seqnum: u32 },
}

/// An in-flight transfer request. Owns its payload buffer until it is
/// removed from the registry, at which point ownership of the buffer
/// passes to the completion path.
#[derive(Debug)]
pub struct Request {
    pub seqnum: u32,
    pub endpoint_key: EndpointKey,
    pub direction: protocol::Direction,
    pub transfer_flags: u32,
    pub transfer_buffer_length: i32,
    pub setup: Option<[u8; 8]>,
    pub payload: Vec<u8>,
    pub status: RequestStatus,
    /// Opaque token identifying the caller's request object, used to
    /// report completion back through `complete(local_handle, ...)`.
    pub local_handle: u64,
}

impl Request {
    pub fn new(
        seqnum: u32,
        endpoint_key: EndpointKey,
        direction: protocol::Direction,
        transfer_flags: u32,
        transfer_buffer_length: i32,
        setup: Option<[u8; 8]>,
        payload: Vec<u8>,
        local_handle: u64,
    ) -> Self {
        Self {
            seqnum,
            endpoint_key,
            direction,
            transfer_flags,
            transfer_buffer_length,
            setup,
            payload,
            status: RequestStatus::Pending,
            local_handle,
        }
    }
}

#[derive(Default)]
struct Inner {
    by_seqnum: HashMap<u32, Request>,
    by_endpoint: HashMap<EndpointKey, Vec<u32>>,
}

/// Per-device-session table of in-flight requests.
#[derive(Default)]
pub struct RequestRegistry {
    inner: Mutex<Inner>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `request` under `request.seqnum`. Panics (a programmer
    /// error, not a runtime condition) if the seqnum is already present
    /// — the sequence allocator guarantees uniqueness per session.
    pub fn insert(&self, request: Request) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let seqnum = request.seqnum;
        let key = request.endpoint_key;
        let prev = inner.by_seqnum.insert(seqnum, request);
        assert!(prev.is_none(), "seqnum {seqnum} reused within a session");
        inner.by_endpoint.entry(key).or_default().push(seqnum);
    }

    /// Removes and returns the request matching `seqnum`, if still
    /// present. This is the single point of authority for "who gets to
    /// complete this request" (spec §4.8): a failed remove means
    /// somebody else already completed it.
    pub fn remove_by_seqnum(&self, seqnum: u32) -> Option<Request> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let request = inner.by_seqnum.remove(&seqnum)?;
        if let Some(seqnums) = inner.by_endpoint.get_mut(&request.endpoint_key) {
            seqnums.retain(|&s| s != seqnum);
            if seqnums.is_empty() {
                inner.by_endpoint.remove(&request.endpoint_key);
            }
        }
        Some(request)
    }

    /// Marks the request at `seqnum` as `Cancelling`, recording the
    /// seqnum the UNLINK itself was sent under. No-op if the request is
    /// no longer present (it already completed) or is already
    /// Cancelling (idempotent cancel, spec §4.5).
    pub fn mark_cancelling(&self, seqnum: u32, unlink_seqnum: u32) -> bool {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        match inner.by_seqnum.get_mut(&seqnum) {
            Some(req) if matches!(req.status, RequestStatus::Pending) => {
                req.status = RequestStatus::Cancelling { unlink_seqnum };
                true
            }
            _ => false,
        }
    }

    /// Removes and returns the request that is `Cancelling` under
    /// `unlink_seqnum` — the seqnum the wire carries on RET_UNLINK is
    /// the CMD_UNLINK's own seqnum, not the original submit's, so the
    /// reader needs this reverse lookup to find the request it
    /// cancelled (spec §4.5, §4.8).
    pub fn take_cancelling_by_unlink_seqnum(&self, unlink_seqnum: u32) -> Option<Request> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let seqnum = inner.by_seqnum.iter().find_map(|(seqnum, req)| {
            match req.status {
                RequestStatus::Cancelling { unlink_seqnum: u } if u == unlink_seqnum => {
                    Some(*seqnum)
                }
                _ => None,
            }
        })?;
        let request = inner.by_seqnum.remove(&seqnum)?;
        if let Some(seqnums) = inner.by_endpoint.get_mut(&request.endpoint_key) {
            seqnums.retain(|&s| s != seqnum);
            if seqnums.is_empty() {
                inner.by_endpoint.remove(&request.endpoint_key);
            }
        }
        Some(request)
    }

    /// Reads back the endpoint and direction of a still-live request,
    /// without removing it — `cancel` needs these to address the
    /// CMD_UNLINK frame before it can mark the request `Cancelling`.
    pub fn endpoint_of(&self, seqnum: u32) -> Option<(EndpointKey, protocol::Direction)> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.by_seqnum.get(&seqnum).map(|r| (r.endpoint_key, r.direction))
    }

    /// Finds the live seqnum whose `local_handle` matches, if any.
    pub fn find_by_local_handle(&self, local_handle: u64) -> Option<u32> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner
            .by_seqnum
            .values()
            .find(|r| r.local_handle == local_handle)
            .map(|r| r.seqnum)
    }

    /// Removes and returns every request matching `key`, in submit
    /// order.
    pub fn drain_by_endpoint(&self, key: EndpointKey) -> Vec<Request> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let seqnums = inner.by_endpoint.remove(&key).unwrap_or_default();
        seqnums
            .into_iter()
            .filter_map(|s| inner.by_seqnum.remove(&s))
            .collect()
    }

    /// Removes and returns every outstanding request, in submit order
    /// (ascending seqnum is insertion order here, since seqnums are
    /// monotonically allocated).
    pub fn drain_all(&self) -> Vec<Request> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.by_endpoint.clear();
        let mut requests: Vec<Request> = inner.by_seqnum.drain().map(|(_, r)| r).collect();
        requests.sort_by_key(|r| r.seqnum);
        requests
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").by_seqnum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::Direction;

    fn req(seqnum: u32, key: EndpointKey, local_handle: u64) -> Request {
        Request::new(seqnum, key, Direction::In, 0, 0, None, Vec::new(), local_handle)
    }

    #[test]
    fn insert_then_remove_by_seqnum_roundtrips() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(1, Direction::In);
        registry.insert(req(2, key, 1));
        let removed = registry.remove_by_seqnum(2).unwrap();
        assert_eq!(removed.seqnum, 2);
        assert!(registry.remove_by_seqnum(2).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_by_seqnum_is_single_winner() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(1, Direction::In);
        registry.insert(req(5, key, 1));
        assert!(registry.remove_by_seqnum(5).is_some());
        assert!(registry.remove_by_seqnum(5).is_none());
    }

    #[test]
    fn drain_by_endpoint_preserves_submit_order() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(1, Direction::In);
        let other = EndpointKey::new(2, Direction::Out);
        registry.insert(req(2, key, 1));
        registry.insert(req(4, other, 2));
        registry.insert(req(6, key, 3));

        let drained = registry.drain_by_endpoint(key);
        assert_eq!(drained.iter().map(|r| r.seqnum).collect::<Vec<_>>(), vec![2, 6]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn drain_all_empties_both_indices() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(1, Direction::In);
        registry.insert(req(2, key, 1));
        registry.insert(req(4, key, 2));

        let drained = registry.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.drain_by_endpoint(key).is_empty());
    }

    #[test]
    fn mark_cancelling_is_idempotent() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(1, Direction::In);
        registry.insert(req(2, key, 1));

        assert!(registry.mark_cancelling(2, 3));
        assert!(!registry.mark_cancelling(2, 99));
    }

    #[test]
    fn mark_cancelling_on_absent_request_is_noop() {
        let registry = RequestRegistry::new();
        assert!(!registry.mark_cancelling(42, 43));
    }

    #[test]
    fn find_by_local_handle_locates_live_request() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(1, Direction::In);
        registry.insert(req(7, key, 99));
        assert_eq!(registry.find_by_local_handle(99), Some(7));
        registry.remove_by_seqnum(7);
        assert_eq!(registry.find_by_local_handle(99), None);
    }

    #[test]
    fn take_cancelling_by_unlink_seqnum_finds_the_original_request() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(1, Direction::In);
        registry.insert(req(2, key, 1));
        assert!(registry.mark_cancelling(2, 30));

        let found = registry.take_cancelling_by_unlink_seqnum(30).unwrap();
        assert_eq!(found.seqnum, 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn take_cancelling_by_unlink_seqnum_ignores_pending_requests() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(1, Direction::In);
        registry.insert(req(2, key, 1));
        assert!(registry.take_cancelling_by_unlink_seqnum(2).is_none());
    }

    #[test]
    fn endpoint_of_reads_back_without_removing() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(3, Direction::Out);
        registry.insert(Request::new(2, key, Direction::Out, 0, 0, None, Vec::new(), 1));
        assert_eq!(registry.endpoint_of(2), Some((key, Direction::Out)));
        assert!(registry.remove_by_seqnum(2).is_some());
        assert_eq!(registry.endpoint_of(2), None);
    }

    #[test]
    #[should_panic(expected = "reused")]
    fn insert_panics_on_duplicate_seqnum() {
        let registry = RequestRegistry::new();
        let key = EndpointKey::new(1, Direction::In);
        registry.insert(req(1, key, 1));
        registry.insert(req(1, key, 2));
    }
}
