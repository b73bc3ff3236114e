//! Behaviour shared by every `RequestStore` implementation.
//!
//! Each backend's test module calls these with a fresh store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::TryStreamExt;

use crate::domain::{Cursor, Pin, Request, RequestId, Scan, Status, StoreError, Transition};
use crate::ports::{RequestStore, new_id_from_time};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// `n` requests under `key`, one second apart, already persisted.
async fn seed(
    store: &dyn RequestStore,
    key: &str,
    n: usize,
    status: impl Fn(usize) -> Status,
) -> Vec<RequestId> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let at = t0() + Duration::seconds(i as i64);
        let mut r = Request::new(key, new_id_from_time(at), Pin::new(format!("cid-{i}")), at);
        r.status = status(i);
        store.put(&r).await.unwrap();
        ids.push(r.request_id);
    }
    ids
}

fn scan(statuses: Vec<Status>, cursor: Cursor, limit: usize) -> Scan {
    Scan {
        statuses,
        cursor,
        limit,
    }
}

fn ids_of(page: &[Request]) -> Vec<RequestId> {
    page.iter().map(|r| r.request_id).collect()
}

pub async fn put_get_delete(store: &dyn RequestStore) {
    let r = Request::new("bucket", new_id_from_time(t0()), Pin::new("bafy").with_name("a"), t0());
    store.put(&r).await.unwrap();
    assert_eq!(store.get("bucket", r.request_id).await.unwrap(), r);

    // upsert
    let mut changed = r.clone();
    changed.pin.name = Some("b".to_string());
    store.put(&changed).await.unwrap();
    assert_eq!(store.get("bucket", r.request_id).await.unwrap(), changed);

    // wrong key
    assert!(store.get("other", r.request_id).await.unwrap_err().is_not_found());

    store.delete("bucket", r.request_id).await.unwrap();
    assert!(store.get("bucket", r.request_id).await.unwrap_err().is_not_found());
    assert!(store.delete("bucket", r.request_id).await.unwrap_err().is_not_found());
    assert_eq!(store.count("bucket", Status::Queued).await.unwrap(), 0);
}

pub async fn transition_is_compare_and_set(store: &dyn RequestStore) {
    let r = Request::new("bucket", new_id_from_time(t0()), Pin::new("bafy"), t0());
    store.put(&r).await.unwrap();

    let t1 = t0() + Duration::seconds(1);
    let pinning = store
        .transition("bucket", r.request_id, &Transition::start_pinning(t1))
        .await
        .unwrap();
    assert_eq!(pinning.status, Status::Pinning);
    assert_eq!(pinning.updated, t1);

    let err = store
        .transition("bucket", r.request_id, &Transition::start_pinning(t1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Conflict {
            expected: Status::Queued,
            actual: Status::Pinning,
            ..
        }
    ));

    let t2 = t1 + Duration::seconds(1);
    store
        .transition("bucket", r.request_id, &Transition::failed(t2, "bummer"))
        .await
        .unwrap();
    let stored = store.get("bucket", r.request_id).await.unwrap();
    assert_eq!(stored.status, Status::Failed);
    assert_eq!(stored.error.as_deref(), Some("bummer"));
    assert_eq!(stored.created, t0());

    let missing = new_id_from_time(t2);
    let err = store
        .transition("bucket", missing, &Transition::pinned(t2))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

pub async fn scan_pages_forward_and_backward(store: &dyn RequestStore) {
    let ids = seed(store, "bucket", 25, |_| Status::Pinned).await;

    let first = store.scan("bucket", &scan(vec![], Cursor::Start, 10)).await.unwrap();
    assert_eq!(ids_of(&first), ids[0..10].to_vec());

    let second = store
        .scan("bucket", &scan(vec![], Cursor::After(ids[9]), 10))
        .await
        .unwrap();
    assert_eq!(ids_of(&second), ids[10..20].to_vec());

    // before: nearest to the cursor first
    let back = store
        .scan("bucket", &scan(vec![], Cursor::Before(ids[10]), 10))
        .await
        .unwrap();
    let mut expected = ids[0..10].to_vec();
    expected.reverse();
    assert_eq!(ids_of(&back), expected);

    let partial = store
        .scan("bucket", &scan(vec![], Cursor::Before(ids[3]), 10))
        .await
        .unwrap();
    assert_eq!(ids_of(&partial), vec![ids[2], ids[1], ids[0]]);

    assert!(store
        .scan("bucket", &scan(vec![], Cursor::After(ids[24]), 10))
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .scan("bucket", &scan(vec![], Cursor::Before(ids[0]), 10))
        .await
        .unwrap()
        .is_empty());

    // walking with `after` reproduces everything once
    let mut walked = Vec::new();
    let mut cursor = Cursor::Start;
    loop {
        let page = store.scan("bucket", &scan(vec![], cursor, 7)).await.unwrap();
        let Some(last) = page.last() else { break };
        cursor = Cursor::After(last.request_id);
        walked.extend(ids_of(&page));
    }
    assert_eq!(walked, ids);
}

pub async fn scan_filters_before_limit(store: &dyn RequestStore) {
    let status = |i: usize| if i % 2 == 0 { Status::Failed } else { Status::Pinned };
    let ids = seed(store, "bucket", 30, status).await;
    let pinned: Vec<RequestId> = ids.iter().copied().skip(1).step_by(2).collect();
    let failed: Vec<RequestId> = ids.iter().copied().step_by(2).collect();

    let both = store
        .scan("bucket", &scan(vec![Status::Pinned, Status::Failed], Cursor::Start, 10))
        .await
        .unwrap();
    assert_eq!(ids_of(&both), ids[0..10].to_vec());

    let only_pinned = store
        .scan("bucket", &scan(vec![Status::Pinned], Cursor::Start, 10))
        .await
        .unwrap();
    assert_eq!(ids_of(&only_pinned), pinned[0..10].to_vec());
    assert!(only_pinned.iter().all(|r| r.status == Status::Pinned));

    let only_failed = store
        .scan("bucket", &scan(vec![Status::Failed], Cursor::After(failed[9]), 100))
        .await
        .unwrap();
    assert_eq!(ids_of(&only_failed), failed[10..].to_vec());

    let back = store
        .scan("bucket", &scan(vec![Status::Pinned], Cursor::Before(ids[29]), 3))
        .await
        .unwrap();
    assert_eq!(ids_of(&back), vec![ids[27], ids[25], ids[23]]);

    assert!(store
        .scan("bucket", &scan(vec![Status::Queued], Cursor::Start, 10))
        .await
        .unwrap()
        .is_empty());
}

pub async fn scan_is_scoped_by_key(store: &dyn RequestStore) {
    // "bucket" is a prefix of "bucket2"; the ranges must not bleed into each other
    let a = seed(store, "bucket", 5, |_| Status::Queued).await;
    let b = seed(store, "bucket2", 5, |_| Status::Queued).await;
    let c = seed(store, "buck", 5, |_| Status::Queued).await;

    let page = store.scan("bucket", &scan(vec![], Cursor::Start, 100)).await.unwrap();
    assert_eq!(ids_of(&page), a);
    assert!(page.iter().all(|r| r.key == "bucket"));

    let page = store
        .scan("bucket2", &scan(vec![Status::Queued], Cursor::Start, 100))
        .await
        .unwrap();
    assert_eq!(ids_of(&page), b);

    let page = store
        .scan("buck", &scan(vec![], Cursor::Before(RequestId::from_u128(u128::MAX)), 100))
        .await
        .unwrap();
    let mut expected = c.clone();
    expected.reverse();
    assert_eq!(ids_of(&page), expected);

    assert!(store.scan("nope", &scan(vec![], Cursor::Start, 10)).await.unwrap().is_empty());
    assert_eq!(store.count("bucket", Status::Queued).await.unwrap(), 5);
    assert_eq!(store.count("nope", Status::Queued).await.unwrap(), 0);
}

pub async fn iterate_spans_keys_in_creation_order(store: &dyn RequestStore) {
    let keys = ["k1", "k2", "k3"];
    let mut queued = Vec::new();
    for i in 0..600usize {
        let at = t0() + Duration::seconds(i as i64);
        let mut r = Request::new(keys[i % 3], new_id_from_time(at), Pin::new("cid"), at);
        if i % 5 == 0 {
            r.status = Status::Pinned;
        } else {
            queued.push(r.request_id);
        }
        store.put(&r).await.unwrap();
    }

    let walked: Vec<Request> = store.iterate(vec![Status::Queued]).try_collect().await.unwrap();
    assert_eq!(ids_of(&walked), queued);

    let all: Vec<Request> = store.iterate(vec![]).try_collect().await.unwrap();
    assert_eq!(all.len(), 600);

    let page = store.scan_all(&[Status::Pinned], None, 3).await.unwrap();
    assert_eq!(page.len(), 3);
    assert!(page.windows(2).all(|w| w[0].request_id < w[1].request_id));
    let next = store
        .scan_all(&[Status::Pinned], Some(page[2].request_id), 1000)
        .await
        .unwrap();
    assert_eq!(next.len(), 120 - 3);
}

pub async fn counts_follow_transitions(store: &dyn RequestStore) {
    let ids = seed(store, "bucket", 4, |_| Status::Queued).await;
    let at = t0() + Duration::hours(1);
    for id in &ids {
        store.transition("bucket", *id, &Transition::start_pinning(at)).await.unwrap();
    }
    store.transition("bucket", ids[0], &Transition::pinned(at)).await.unwrap();
    store.transition("bucket", ids[1], &Transition::failed(at, "x")).await.unwrap();
    store.transition("bucket", ids[2], &Transition::requeue(at)).await.unwrap();

    assert_eq!(store.count("bucket", Status::Queued).await.unwrap(), 1);
    assert_eq!(store.count("bucket", Status::Pinning).await.unwrap(), 1);
    assert_eq!(store.count("bucket", Status::Pinned).await.unwrap(), 1);
    assert_eq!(store.count("bucket", Status::Failed).await.unwrap(), 1);

    let pinning: Vec<Request> = store.iterate(vec![Status::Pinning]).try_collect().await.unwrap();
    assert_eq!(ids_of(&pinning), vec![ids[3]]);

    // the status index follows the record
    let queued = store
        .scan("bucket", &scan(vec![Status::Queued], Cursor::Start, 10))
        .await
        .unwrap();
    assert_eq!(ids_of(&queued), vec![ids[2]]);
}

pub async fn ids_are_unique_across_keys(store: &dyn RequestStore) {
    let id = new_id_from_time(t0());
    let a = Request::new("a", id, Pin::new("bafy-a"), t0());
    store.put(&a).await.unwrap();

    let b = Request::new("b", id, Pin::new("bafy-b"), t0());
    let err = store.put(&b).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { ref key, .. } if key == "a"));
    assert!(store.get("b", id).await.unwrap_err().is_not_found());

    // the original record is still visible to the global index
    let queued = store.scan_all(&[Status::Queued], None, 10).await.unwrap();
    assert_eq!(queued, vec![a.clone()]);

    // once removed, the id is free again
    store.delete("a", id).await.unwrap();
    store.put(&b).await.unwrap();
    assert_eq!(store.scan_all(&[], None, 10).await.unwrap(), vec![b]);
}

pub async fn create_never_overwrites(store: &dyn RequestStore) {
    let r = Request::new("bucket", new_id_from_time(t0()), Pin::new("bafy"), t0());
    store.create(&r).await.unwrap();
    store
        .transition("bucket", r.request_id, &Transition::start_pinning(t0()))
        .await
        .unwrap();

    let err = store.create(&r).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { ref key, .. } if key == "bucket"));

    let mut elsewhere = r.clone();
    elsewhere.key = "other".to_string();
    let err = store.create(&elsewhere).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { ref key, .. } if key == "bucket"));

    let stored = store.get("bucket", r.request_id).await.unwrap();
    assert_eq!(stored.status, Status::Pinning);
    assert_eq!(store.count("bucket", Status::Queued).await.unwrap(), 0);
}

pub async fn scan_all_skips_terminal_records(store: &dyn RequestStore) {
    let status = |i: usize| match i % 4 {
        0 => Status::Queued,
        1 => Status::Pinning,
        2 => Status::Pinned,
        _ => Status::Failed,
    };
    let a = seed(store, "a", 20, status).await;
    let b = seed(store, "b", 20, status).await;

    let mut expected: Vec<RequestId> = a.iter().chain(&b).copied().step_by(4).collect();
    expected.sort();
    let queued = store.scan_all(&[Status::Queued], None, 100).await.unwrap();
    assert_eq!(ids_of(&queued), expected);

    // `after` and `limit` apply to the merged order
    let page = store
        .scan_all(&[Status::Queued, Status::Pinning], Some(expected[0]), 3)
        .await
        .unwrap();
    assert_eq!(page.len(), 3);
    assert!(page.windows(2).all(|w| w[0].request_id < w[1].request_id));
    assert!(page.iter().all(|r| !r.status.is_terminal()));
    assert!(page[0].request_id > expected[0]);
}
