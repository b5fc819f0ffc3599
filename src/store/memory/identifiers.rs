//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::store::mapper::{ModSeqProvider, UidProvider};
use crate::store::model::*;
use crate::support::error::Error;

/// A lazily-populated table of per-mailbox counters.
///
/// Each mailbox gets its own atomic, so allocation in one mailbox never waits
/// on another; the table lock is only taken for writing the first time a
/// mailbox is seen.
#[derive(Default)]
struct CounterTable {
    counters: RwLock<HashMap<MailboxId, Arc<AtomicU64>>>,
}

impl CounterTable {
    fn counter(&self, mailbox: MailboxId) -> Arc<AtomicU64> {
        if let Some(counter) = self
            .counters
            .read()
            .expect("counter table poisoned")
            .get(&mailbox)
        {
            return Arc::clone(counter);
        }

        Arc::clone(
            self.counters
                .write()
                .expect("counter table poisoned")
                .entry(mailbox)
                .or_default(),
        )
    }

    /// Advance the counter for `mailbox` by `by`, returning the new value.
    ///
    /// Fails with `MailboxFull`, leaving the counter unchanged, if the result
    /// would exceed `max`.
    fn advance(
        &self,
        mailbox: MailboxId,
        by: u64,
        max: u64,
    ) -> Result<u64, Error> {
        let counter = self.counter(mailbox);
        let prev = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                v.checked_add(by).filter(|&n| n <= max)
            })
            .map_err(|_| Error::MailboxFull)?;
        Ok(prev + by)
    }

    fn remove(&self, mailbox: MailboxId) {
        self.counters
            .write()
            .expect("counter table poisoned")
            .remove(&mailbox);
    }

    fn current(&self, mailbox: MailboxId) -> u64 {
        self.counters
            .read()
            .expect("counter table poisoned")
            .get(&mailbox)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct MemoryUidProvider {
    table: CounterTable,
}

impl MemoryUidProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UidProvider for MemoryUidProvider {
    fn next_uid(&self, mailbox: MailboxId) -> Result<Uid, Error> {
        let raw = self.table.advance(mailbox, 1, u32::MAX.into())?;
        Uid::of(raw as u32).ok_or(Error::MailboxFull)
    }

    fn next_uids(
        &self,
        mailbox: MailboxId,
        count: NonZeroUsize,
    ) -> Result<Vec<Uid>, Error> {
        let count = count.get() as u64;
        let last = self.table.advance(mailbox, count, u32::MAX.into())?;
        ((last - count + 1)..=last)
            .map(|raw| Uid::of(raw as u32).ok_or(Error::MailboxFull))
            .collect()
    }

    fn last_uid(&self, mailbox: MailboxId) -> Result<Option<Uid>, Error> {
        Ok(Uid::of(self.table.current(mailbox) as u32))
    }

    fn forget(&self, mailbox: MailboxId) -> Result<(), Error> {
        self.table.remove(mailbox);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryModSeqProvider {
    table: CounterTable,
}

impl MemoryModSeqProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModSeqProvider for MemoryModSeqProvider {
    fn next_mod_seq(&self, mailbox: MailboxId) -> Result<ModSeq, Error> {
        self.table.advance(mailbox, 1, u64::MAX).map(ModSeq)
    }

    fn highest_mod_seq(&self, mailbox: MailboxId) -> Result<ModSeq, Error> {
        Ok(ModSeq(self.table.current(mailbox)))
    }

    fn forget(&self, mailbox: MailboxId) -> Result<(), Error> {
        self.table.remove(mailbox);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use proptest::prelude::*;
    use rayon::prelude::*;

    use super::*;

    #[test]
    fn fresh_mailbox() {
        let uids = MemoryUidProvider::new();
        let mod_seqs = MemoryModSeqProvider::new();

        assert_eq!(None, uids.last_uid(MailboxId(1)).unwrap());
        assert_eq!(
            ModSeq::ZERO,
            mod_seqs.highest_mod_seq(MailboxId(1)).unwrap()
        );

        assert_eq!(Uid::MIN, uids.next_uid(MailboxId(1)).unwrap());
        assert_eq!(Some(Uid::MIN), uids.last_uid(MailboxId(1)).unwrap());
        assert_eq!(ModSeq(1), mod_seqs.next_mod_seq(MailboxId(1)).unwrap());
        assert_eq!(
            ModSeq(1),
            mod_seqs.highest_mod_seq(MailboxId(1)).unwrap()
        );

        // Other mailboxes are unaffected
        assert_eq!(None, uids.last_uid(MailboxId(2)).unwrap());
        assert_eq!(Uid::MIN, uids.next_uid(MailboxId(2)).unwrap());
    }

    #[test]
    fn batch_allocation() {
        let uids = MemoryUidProvider::new();
        uids.next_uid(MailboxId(1)).unwrap();
        assert_eq!(
            vec![Uid::u(2), Uid::u(3), Uid::u(4)],
            uids.next_uids(MailboxId(1), NonZeroUsize::new(3).unwrap())
                .unwrap()
        );
        assert_eq!(Uid::u(5), uids.next_uid(MailboxId(1)).unwrap());
    }

    #[test]
    fn uid_exhaustion() {
        let uids = MemoryUidProvider::new();
        uids.table
            .advance(MailboxId(1), u64::from(u32::MAX) - 1, u32::MAX.into())
            .unwrap();
        assert_eq!(
            Some(Uid::u(u32::MAX - 1)),
            uids.last_uid(MailboxId(1)).unwrap()
        );
        assert_eq!(Uid::MAX, uids.next_uid(MailboxId(1)).unwrap());
        assert_matches!(Err(Error::MailboxFull), uids.next_uid(MailboxId(1)));
        assert_matches!(
            Err(Error::MailboxFull),
            uids.next_uids(MailboxId(1), NonZeroUsize::new(2).unwrap())
        );
        assert_eq!(Some(Uid::MAX), uids.last_uid(MailboxId(1)).unwrap());
    }

    #[test]
    fn forgotten_counters_are_dropped() {
        let uids = MemoryUidProvider::new();
        let mod_seqs = MemoryModSeqProvider::new();
        uids.next_uid(MailboxId(1)).unwrap();
        uids.next_uid(MailboxId(2)).unwrap();
        mod_seqs.next_mod_seq(MailboxId(1)).unwrap();

        uids.forget(MailboxId(1)).unwrap();
        mod_seqs.forget(MailboxId(1)).unwrap();
        assert!(!uids
            .table
            .counters
            .read()
            .unwrap()
            .contains_key(&MailboxId(1)));
        assert!(!mod_seqs
            .table
            .counters
            .read()
            .unwrap()
            .contains_key(&MailboxId(1)));
        assert_eq!(Some(Uid::MIN), uids.last_uid(MailboxId(2)).unwrap());
        // Forgetting an unknown mailbox is harmless
        uids.forget(MailboxId(99)).unwrap();
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let uids = MemoryUidProvider::new();
        let mod_seqs = MemoryModSeqProvider::new();

        let allocated = (0..2000)
            .into_par_iter()
            .map(|i| {
                let mailbox = MailboxId(i % 3);
                (
                    mailbox,
                    uids.next_uid(mailbox).unwrap(),
                    mod_seqs.next_mod_seq(mailbox).unwrap(),
                )
            })
            .collect::<Vec<_>>();

        for mailbox in 0..3 {
            let mailbox = MailboxId(mailbox);
            let mine = allocated
                .iter()
                .filter(|&&(m, _, _)| m == mailbox)
                .collect::<Vec<_>>();
            let distinct_uids =
                mine.iter().map(|&&(_, u, _)| u).collect::<BTreeSet<_>>();
            let distinct_mod_seqs =
                mine.iter().map(|&&(_, _, m)| m).collect::<BTreeSet<_>>();
            assert_eq!(mine.len(), distinct_uids.len());
            assert_eq!(mine.len(), distinct_mod_seqs.len());
            assert_eq!(
                Some(mine.len() as u32),
                uids.last_uid(mailbox).unwrap().map(Uid::get)
            );
        }
    }

    proptest! {
        #[test]
        fn uids_strictly_increase_per_mailbox(
            sequence in prop::collection::vec(0u64..4, 1..200)
        ) {
            let uids = MemoryUidProvider::new();
            let mod_seqs = MemoryModSeqProvider::new();
            let mut last_uid = HashMap::<MailboxId, Uid>::new();
            let mut last_mod_seq = HashMap::<MailboxId, ModSeq>::new();

            for mailbox in sequence {
                let mailbox = MailboxId(mailbox);
                let uid = uids.next_uid(mailbox).unwrap();
                let mod_seq = mod_seqs.next_mod_seq(mailbox).unwrap();

                if let Some(&prev) = last_uid.get(&mailbox) {
                    prop_assert!(uid > prev);
                } else {
                    prop_assert_eq!(Uid::MIN, uid);
                }
                if let Some(&prev) = last_mod_seq.get(&mailbox) {
                    prop_assert!(mod_seq > prev);
                }

                last_uid.insert(mailbox, uid);
                last_mod_seq.insert(mailbox, mod_seq);
                prop_assert_eq!(Some(uid), uids.last_uid(mailbox).unwrap());
                prop_assert_eq!(
                    mod_seq, mod_seqs.highest_mod_seq(mailbox).unwrap());
            }
        }
    }
}
