use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-user admission gate bounding simultaneous transfer operations.
///
/// Counts live in a sharded map; a user with no operation in flight has no
/// entry. Admission returns a [`ConcurrencyPermit`] whose drop releases the
/// slot, so the decrement happens on every exit path.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    limit: usize,
    counts: DashMap<Uuid, usize>,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            counts: DashMap::new(),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admits one more operation for `user_id`, or `None` at the ceiling.
    pub fn try_acquire(self: &Arc<Self>, user_id: Uuid) -> Option<ConcurrencyPermit> {
        match self.counts.entry(user_id) {
            Entry::Occupied(mut entry) => {
                if *entry.get() >= self.limit {
                    return None;
                }
                *entry.get_mut() += 1;
            }
            Entry::Vacant(entry) => {
                entry.insert(1);
            }
        }

        Some(ConcurrencyPermit {
            limiter: Arc::clone(self),
            user_id,
        })
    }

    pub fn in_flight(&self, user_id: Uuid) -> usize {
        self.counts.get(&user_id).map(|c| *c).unwrap_or(0)
    }

    fn release(&self, user_id: Uuid) {
        if let Entry::Occupied(mut entry) = self.counts.entry(user_id) {
            if *entry.get() <= 1 {
                entry.remove();
            } else {
                *entry.get_mut() -= 1;
            }
        }
    }
}

#[derive(Debug)]
pub struct ConcurrencyPermit {
    limiter: Arc<ConcurrencyLimiter>,
    user_id: Uuid,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.limiter.release(self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_at_ceiling() {
        let limiter = ConcurrencyLimiter::new(2);
        let user = Uuid::new_v4();

        let a = limiter.try_acquire(user).expect("first");
        let _b = limiter.try_acquire(user).expect("second");
        assert!(limiter.try_acquire(user).is_none());
        assert_eq!(limiter.in_flight(user), 2);

        drop(a);
        assert_eq!(limiter.in_flight(user), 1);
        assert!(limiter.try_acquire(user).is_some());
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = ConcurrencyLimiter::new(1);
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let _a = limiter.try_acquire(alice).expect("alice");
        assert!(limiter.try_acquire(alice).is_none());
        assert!(limiter.try_acquire(bob).is_some());
    }

    #[test]
    fn test_entry_removed_when_idle() {
        let limiter = ConcurrencyLimiter::new(3);
        let user = Uuid::new_v4();
        {
            let _p = limiter.try_acquire(user);
        }
        assert_eq!(limiter.in_flight(user), 0);
        assert!(limiter.counts.is_empty());
    }

    #[tokio::test]
    async fn test_permits_across_tasks() {
        let limiter = ConcurrencyLimiter::new(4);
        let user = Uuid::new_v4();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let permit = limiter.try_acquire(user);
                tokio::task::yield_now().await;
                permit.is_some()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(limiter.in_flight(user), 0);
    }
}
