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

use std::collections::BTreeMap;

use super::defs::*;
use crate::events::{EventKind, MailboxRef};
use crate::store::model::*;
use crate::support::error::Error;

impl Engine {
    /// Look up the annotations of the mailbox at `path` matching `keys` to
    /// the given depth. No keys means every annotation.
    pub fn get_annotations(
        &self,
        path: &MailboxPath,
        keys: &[AnnotationKey],
        depth: AnnotationDepth,
    ) -> Result<Vec<MailboxAnnotation>, Error> {
        let mailbox = self.find_mailbox(path)?;
        let store = &self.backend.annotations;
        if keys.is_empty() {
            return store.get_all_annotations(mailbox.id);
        }

        match depth {
            AnnotationDepth::Zero => {
                store.get_annotations_by_keys(mailbox.id, keys)
            },
            AnnotationDepth::One => {
                store.get_annotations_by_keys_with_one_depth(mailbox.id, keys)
            },
            AnnotationDepth::Infinity => {
                store.get_annotations_by_keys_with_all_depth(mailbox.id, keys)
            },
        }
    }

    /// Apply `annotations` to the mailbox at `path`, in order. Nil values
    /// delete.
    ///
    /// The whole request is validated against the size and count limits
    /// before anything is written.
    pub fn update_annotations(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        annotations: Vec<MailboxAnnotation>,
    ) -> Result<Vec<AnnotationKey>, Error> {
        let mailbox = self.find_mailbox(path)?;
        let limits = &self.annotation_limits;
        let store = &self.backend.annotations;

        if annotations.iter().any(|a| a.size() > limits.max_value_size) {
            return Err(Error::AnnotationTooLarge);
        }

        let keys = annotations
            .iter()
            .map(|a| a.key.clone())
            .collect::<Vec<_>>();
        let mut state = store
            .get_annotations_by_keys(mailbox.id, &keys)?
            .into_iter()
            .map(|a| (a.key, a.value))
            .collect::<BTreeMap<_, _>>();
        let mut count = store.count_annotations(mailbox.id)?;

        let mut changes = Vec::<MailboxAnnotation>::new();
        for annotation in annotations {
            let current = state.get(&annotation.key).cloned().flatten();
            if current == annotation.value {
                continue;
            }

            match (&current, &annotation.value) {
                (None, Some(_)) => {
                    count += 1;
                    if count > limits.max_entries {
                        return Err(Error::AnnotationLimit);
                    }
                },
                (Some(_), None) => count -= 1,
                _ => (),
            }

            state.insert(annotation.key.clone(), annotation.value.clone());
            changes.retain(|c| c.key != annotation.key);
            changes.push(annotation);
        }

        for change in &changes {
            if change.is_nil() {
                store.delete_annotation(mailbox.id, &change.key)?;
            } else {
                store.insert_annotation(mailbox.id, change.clone())?;
            }
        }

        let changed = changes.into_iter().map(|c| c.key).collect::<Vec<_>>();
        self.dispatch(
            session,
            EventKind::AnnotationChanged {
                mailbox: MailboxRef::from(&mailbox),
                keys: changed.clone(),
            },
        )?;
        Ok(changed)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;
    use crate::support::system_config::SystemConfig;

    fn k(s: &str) -> AnnotationKey {
        AnnotationKey::new(s).unwrap()
    }

    fn set(
        fixture: &TestFixture,
        entries: &[(&str, Option<&str>)],
    ) -> Result<Vec<AnnotationKey>, Error> {
        fixture.engine.update_annotations(
            &fixture.session,
            &fixture.path("INBOX"),
            entries
                .iter()
                .map(|&(key, value)| MailboxAnnotation {
                    key: k(key),
                    value: value.map(str::to_owned),
                })
                .collect(),
        )
    }

    fn get(
        fixture: &TestFixture,
        keys: &[&str],
        depth: AnnotationDepth,
    ) -> Vec<String> {
        fixture
            .engine
            .get_annotations(
                &fixture.path("INBOX"),
                &keys.iter().map(|s| k(s)).collect::<Vec<_>>(),
                depth,
            )
            .unwrap()
            .into_iter()
            .map(|a| a.key.to_string())
            .collect()
    }

    #[test]
    fn depth_selection() {
        let fixture = TestFixture::new();
        fixture.create("INBOX");
        set(
            &fixture,
            &[
                ("/shared", Some("a")),
                ("/shared/x", Some("b")),
                ("/shared/x/y", Some("c")),
                ("/private/x", Some("d")),
            ],
        )
        .unwrap();

        assert_eq!(
            vec!["/shared"],
            get(&fixture, &["/shared"], AnnotationDepth::Zero)
        );
        assert_eq!(
            vec!["/shared", "/shared/x"],
            get(&fixture, &["/shared"], AnnotationDepth::One)
        );
        assert_eq!(
            vec!["/shared", "/shared/x", "/shared/x/y"],
            get(&fixture, &["/shared"], AnnotationDepth::Infinity)
        );
        assert_eq!(4, get(&fixture, &[], AnnotationDepth::Zero).len());
    }

    #[test]
    fn updates_report_changed_keys() {
        let fixture = TestFixture::new();
        fixture.create("INBOX");
        fixture.take_events();

        assert_eq!(
            vec![k("/shared/comment")],
            set(&fixture, &[("/shared/comment", Some("hello"))]).unwrap()
        );
        assert_eq!(vec!["AnnotationChanged"], fixture.take_events());

        // Same value again, and deleting something absent
        assert!(set(
            &fixture,
            &[("/shared/comment", Some("hello")), ("/shared/other", None)]
        )
        .unwrap()
        .is_empty());
        assert!(fixture.take_events().is_empty());

        assert_eq!(
            vec![k("/shared/comment")],
            set(&fixture, &[("/SHARED/Comment", None)]).unwrap()
        );
        assert!(get(&fixture, &[], AnnotationDepth::Zero).is_empty());
    }

    #[test]
    fn limits_are_checked_before_writing() {
        let mut config = SystemConfig::default();
        config.annotations.max_entries = 2;
        config.annotations.max_value_size = 4;
        let fixture = TestFixture::with_config(config);
        fixture.create("INBOX");

        assert_matches!(
            Err(Error::AnnotationTooLarge),
            set(
                &fixture,
                &[("/shared/a", Some("a")), ("/shared/b", Some("12345"))]
            )
        );
        assert!(get(&fixture, &[], AnnotationDepth::Zero).is_empty());

        set(&fixture, &[("/shared/a", Some("a")), ("/shared/b", Some("b"))])
            .unwrap();
        assert_matches!(
            Err(Error::AnnotationLimit),
            set(
                &fixture,
                &[("/shared/a", Some("x")), ("/shared/c", Some("c"))]
            )
        );
        assert_eq!(
            Some("a".to_owned()),
            fixture
                .engine
                .get_annotations(
                    &fixture.path("INBOX"),
                    &[k("/shared/a")],
                    AnnotationDepth::Zero
                )
                .unwrap()[0]
                .value
        );

        // Freeing a slot in the same request makes room
        set(&fixture, &[("/shared/a", None), ("/shared/c", Some("c"))])
            .unwrap();
        assert_eq!(
            vec!["/shared/b", "/shared/c"],
            get(&fixture, &[], AnnotationDepth::Zero)
        );
    }

    #[test]
    fn deleted_mailbox_takes_annotations_along() {
        let fixture = TestFixture::new();
        fixture.create("INBOX");
        set(&fixture, &[("/shared/a", Some("a"))]).unwrap();
        fixture
            .engine
            .delete_mailbox(&fixture.session, &fixture.path("INBOX"))
            .unwrap();
        fixture.create("INBOX");
        assert!(get(&fixture, &[], AnnotationDepth::Zero).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn one_depth_is_bounded_by_segments(
            segments in prop::collection::vec("[a-c]", 1..5),
            query_len in 1usize..4,
        ) {
            let fixture = TestFixture::new();
            fixture.create("INBOX");

            let stored = format!("/{}", segments.join("/"));
            set(&fixture, &[(stored.as_str(), Some("v"))]).unwrap();

            let query_len = query_len.min(segments.len());
            let query = format!("/{}", segments[..query_len].join("/"));
            let found = get(&fixture, &[query.as_str()], AnnotationDepth::One);
            prop_assert_eq!(
                segments.len() <= query_len + 1,
                found.contains(&stored)
            );
            prop_assert!(
                get(&fixture, &[query.as_str()], AnnotationDepth::Infinity)
                    .contains(&stored)
            );
        }
    }
}
