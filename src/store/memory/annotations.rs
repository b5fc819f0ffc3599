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

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::store::mapper::AnnotationStore;
use crate::store::model::*;
use crate::support::error::Error;

#[derive(Default)]
pub struct MemoryAnnotationStore {
    annotations: RwLock<HashMap<MailboxId, BTreeMap<AnnotationKey, String>>>,
}

impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(
        &self,
        mailbox: MailboxId,
        mut pred: impl FnMut(&AnnotationKey) -> bool,
    ) -> Vec<MailboxAnnotation> {
        self.annotations
            .read()
            .expect("annotation table poisoned")
            .get(&mailbox)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|&(k, _)| pred(k))
                    .map(|(k, v)| MailboxAnnotation::new(k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl AnnotationStore for MemoryAnnotationStore {
    fn get_all_annotations(
        &self,
        mailbox: MailboxId,
    ) -> Result<Vec<MailboxAnnotation>, Error> {
        Ok(self.select(mailbox, |_| true))
    }

    fn get_annotations_by_keys(
        &self,
        mailbox: MailboxId,
        keys: &[AnnotationKey],
    ) -> Result<Vec<MailboxAnnotation>, Error> {
        Ok(self.select(mailbox, |stored| keys.contains(stored)))
    }

    fn get_annotations_by_keys_with_one_depth(
        &self,
        mailbox: MailboxId,
        keys: &[AnnotationKey],
    ) -> Result<Vec<MailboxAnnotation>, Error> {
        Ok(self.select(mailbox, |stored| {
            keys.iter().any(|k| {
                k.is_self_or_ancestor_of(stored)
                    && stored.component_count() <= k.component_count() + 1
            })
        }))
    }

    fn get_annotations_by_keys_with_all_depth(
        &self,
        mailbox: MailboxId,
        keys: &[AnnotationKey],
    ) -> Result<Vec<MailboxAnnotation>, Error> {
        Ok(self.select(mailbox, |stored| {
            keys.iter().any(|k| k.is_self_or_ancestor_of(stored))
        }))
    }

    fn insert_annotation(
        &self,
        mailbox: MailboxId,
        annotation: MailboxAnnotation,
    ) -> Result<(), Error> {
        let value = annotation.value.ok_or(Error::NilAnnotation)?;
        self.annotations
            .write()
            .expect("annotation table poisoned")
            .entry(mailbox)
            .or_default()
            .insert(annotation.key, value);
        Ok(())
    }

    fn delete_annotation(
        &self,
        mailbox: MailboxId,
        key: &AnnotationKey,
    ) -> Result<(), Error> {
        if let Some(entries) = self
            .annotations
            .write()
            .expect("annotation table poisoned")
            .get_mut(&mailbox)
        {
            entries.remove(key);
        }
        Ok(())
    }

    fn exists(
        &self,
        mailbox: MailboxId,
        key: &AnnotationKey,
    ) -> Result<bool, Error> {
        Ok(self
            .annotations
            .read()
            .expect("annotation table poisoned")
            .get(&mailbox)
            .map_or(false, |entries| entries.contains_key(key)))
    }

    fn count_annotations(&self, mailbox: MailboxId) -> Result<usize, Error> {
        Ok(self
            .annotations
            .read()
            .expect("annotation table poisoned")
            .get(&mailbox)
            .map_or(0, BTreeMap::len))
    }

    fn purge(&self, mailbox: MailboxId) -> Result<(), Error> {
        self.annotations
            .write()
            .expect("annotation table poisoned")
            .remove(&mailbox);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn k(s: &str) -> AnnotationKey {
        AnnotationKey::new(s).unwrap()
    }

    fn keys(found: Vec<MailboxAnnotation>) -> Vec<String> {
        found.into_iter().map(|a| a.key.to_string()).collect()
    }

    fn populated() -> MemoryAnnotationStore {
        let store = MemoryAnnotationStore::new();
        for key in &[
            "/private/comment",
            "/private/comment/en",
            "/private/comment/en/gb",
            "/private/commentary",
            "/shared/comment",
        ] {
            store
                .insert_annotation(
                    MailboxId(1),
                    MailboxAnnotation::new(k(key), "v"),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn depth_selection() {
        let store = populated();
        let mb = MailboxId(1);
        let q = [k("/private/comment")];

        assert_eq!(
            vec!["/private/comment"],
            keys(store.get_annotations_by_keys(mb, &q).unwrap())
        );
        assert_eq!(
            vec!["/private/comment", "/private/comment/en"],
            keys(store.get_annotations_by_keys_with_one_depth(mb, &q).unwrap())
        );
        assert_eq!(
            vec![
                "/private/comment",
                "/private/comment/en",
                "/private/comment/en/gb",
            ],
            keys(store.get_annotations_by_keys_with_all_depth(mb, &q).unwrap())
        );

        // Keys are matched case-insensitively
        assert_eq!(
            vec!["/shared/comment"],
            keys(
                store
                    .get_annotations_by_keys(mb, &[k("/SHARED/Comment")])
                    .unwrap()
            )
        );
        assert_eq!(5, store.get_all_annotations(mb).unwrap().len());
        assert!(store.get_all_annotations(MailboxId(2)).unwrap().is_empty());
    }

    #[test]
    fn insert_overwrite_and_delete() {
        let store = MemoryAnnotationStore::new();
        let mb = MailboxId(1);
        store
            .insert_annotation(mb, MailboxAnnotation::new(k("/shared/x"), "a"))
            .unwrap();
        store
            .insert_annotation(mb, MailboxAnnotation::new(k("/Shared/X"), "b"))
            .unwrap();
        assert_eq!(1, store.count_annotations(mb).unwrap());
        assert_eq!(
            Some("b".to_owned()),
            store.get_all_annotations(mb).unwrap()[0].value
        );

        assert_matches!(
            Err(Error::NilAnnotation),
            store.insert_annotation(mb, MailboxAnnotation::nil(k("/shared/y")))
        );

        assert!(store.exists(mb, &k("/shared/x")).unwrap());
        store.delete_annotation(mb, &k("/shared/x")).unwrap();
        assert!(!store.exists(mb, &k("/shared/x")).unwrap());
        store.delete_annotation(MailboxId(9), &k("/shared/x")).unwrap();
    }

    #[test]
    fn purge_clears_one_mailbox() {
        let store = populated();
        store
            .insert_annotation(
                MailboxId(2),
                MailboxAnnotation::new(k("/shared/x"), "v"),
            )
            .unwrap();
        store.purge(MailboxId(1)).unwrap();
        assert_eq!(0, store.count_annotations(MailboxId(1)).unwrap());
        assert_eq!(1, store.count_annotations(MailboxId(2)).unwrap());
    }
}
