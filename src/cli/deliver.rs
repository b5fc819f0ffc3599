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

use std::fs;
use std::io::{self, Read};
use std::mem;
use std::path::{Path, PathBuf};

use log::{error, info};

use super::main::DeliverSubcommand;
use crate::engine::{AppendOptions, Engine};
use crate::store::model::*;
use crate::support::{error::Error, sysexits::*, system_config::SystemConfig};

pub(super) fn deliver(
    system_config: &SystemConfig,
    mut cmd: DeliverSubcommand,
) {
    if cmd.user.is_empty() {
        die!(EX_NOUSER, "No user given");
    }

    let engine = Engine::in_memory(system_config);
    let session = MailboxSession::new(&cmd.user);

    let inbox = MailboxPath::inbox(&cmd.user);
    if let Err(e) = engine.create_mailbox(&session, &inbox) {
        die!(EX_SOFTWARE, "Failed to provision INBOX: {}", e);
    }

    let path = match engine.personal_path(&session, &cmd.mailbox) {
        Ok(path) => path,
        Err(_) => die!(EX_DATAERR, "{}: Bad mailbox name", cmd.mailbox),
    };

    if cmd.create {
        match engine.create_mailbox(&session, &path) {
            Ok(_) | Err(Error::MailboxExists) => (),
            Err(e) => {
                die!(EX_CANTCREAT, "Failed to create {}: {}", cmd.mailbox, e)
            },
        }
    }

    match engine.mailbox_exists(&path) {
        Ok(true) => (),
        Ok(false) => {
            die!(EX_CANTCREAT, "{}: Non-existent mailbox", cmd.mailbox)
        },
        Err(e) => die!(EX_SOFTWARE, "Failed to open {}: {}", cmd.mailbox, e),
    }

    let items = mem::take(&mut cmd.inputs);
    let mut target = EngineTarget {
        engine: &engine,
        session: &session,
        path: &path,
    };
    let uids = match run_delivery(
        &cmd,
        items.into_iter(),
        io::stdin().lock(),
        &mut target,
    ) {
        Ok(uids) => uids,
        Err(exit) => exit.exit(),
    };

    let ranges = MessageRange::to_ranges(uids)
        .into_iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>();
    println!("{} UID {}", path, ranges.join(","));

    match engine
        .quota_root(&path)
        .and_then(|root| engine.get_quotas(&root).map(|q| (root, q)))
    {
        Ok((root, (count, size))) => {
            println!("QUOTA {} MESSAGE {} STORAGE {}", root, count, size)
        },
        Err(e) => die!(EX_SOFTWARE, "Failed to read quota: {}", e),
    }
}

trait DeliveryTarget {
    fn deliver(&mut self, flags: Flags, data: Vec<u8>) -> Result<Uid, Error>;
}

struct EngineTarget<'a> {
    engine: &'a Engine,
    session: &'a MailboxSession,
    path: &'a MailboxPath,
}

impl<'a> DeliveryTarget for EngineTarget<'a> {
    fn deliver(&mut self, flags: Flags, data: Vec<u8>) -> Result<Uid, Error> {
        let meta = self.engine.append(
            self.session,
            self.path,
            data,
            AppendOptions {
                flags,
                is_delivery: true,
                is_recent: true,
                ..AppendOptions::default()
            },
        )?;
        info!(
            "{} Delivered {} to {}",
            self.session.log_prefix, meta.message_id, self.path
        );
        Ok(meta.uid)
    }
}

fn run_delivery(
    cmd: &DeliverSubcommand,
    items: impl Iterator<Item = PathBuf>,
    mut stdin: impl Read,
    target: &mut impl DeliveryTarget,
) -> Result<Vec<Uid>, Sysexit> {
    let mut uids = Vec::new();
    for item in items {
        match deliver_single(cmd, &item, &mut stdin, target) {
            Ok(uid) => uids.push(uid),
            Err(e) => {
                error!("Unable to process {}: {}", item.display(), e);
                return Err(match e {
                    Error::Io(e) if io::ErrorKind::NotFound == e.kind() => {
                        EX_NOINPUT
                    },
                    Error::Io(_) => EX_IOERR,
                    Error::OverQuota(_) => EX_TEMPFAIL,
                    Error::UnsafeName | Error::NxFlag => EX_DATAERR,
                    _ => EX_SOFTWARE,
                });
            },
        }
    }

    Ok(uids)
}

fn deliver_single(
    cmd: &DeliverSubcommand,
    item: &Path,
    stdin: &mut impl Read,
    target: &mut impl DeliveryTarget,
) -> Result<Uid, Error> {
    let mut data = Vec::new();
    if Path::new("-") == item {
        stdin.read_to_end(&mut data)?;
    } else {
        fs::File::open(item)?.read_to_end(&mut data)?;
    }

    let mut flags = cmd.flag.iter().cloned().collect::<Flags>();
    if cmd.maildir_flags {
        for flag in extract_maildir_flags(item) {
            flags.insert(flag);
        }
    }

    target.deliver(flags, normalise_line_endings(data))
}

/// Maildir encodes flags as letters after the `:2,` (or `.2`) suffix of the
/// file name.
fn extract_maildir_flags(path: &Path) -> impl Iterator<Item = Flag> + '_ {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .chars()
        .filter_map(|ch| match ch {
            'D' => Some(Flag::Draft),
            'F' => Some(Flag::Flagged),
            'R' => Some(Flag::Answered),
            'S' => Some(Flag::Seen),
            'T' => Some(Flag::Deleted),
            _ => None,
        })
}

/// If the first line ending of `data` is a bare LF, turn every bare LF into
/// CRLF. Input whose first line ends in CRLF is returned unchanged, as is
/// input without any line ending.
fn normalise_line_endings(data: Vec<u8>) -> Vec<u8> {
    let first_lf = match data.iter().position(|&b| b'\n' == b) {
        Some(ix) => ix,
        None => return data,
    };

    if first_lf > 0 && b'\r' == data[first_lf - 1] {
        return data;
    }

    let bare_lfs = data
        .iter()
        .enumerate()
        .filter(|&(ix, &b)| b'\n' == b && (0 == ix || b'\r' != data[ix - 1]))
        .count();
    let mut converted = Vec::with_capacity(data.len() + bare_lfs);
    let mut prev = 0u8;
    for &b in &data {
        if b'\n' == b && b'\r' != prev {
            converted.push(b'\r');
        }
        converted.push(b);
        prev = b;
    }
    converted
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::iter;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_extract_maildir_flags() {
        fn extract(s: &str) -> Vec<Flag> {
            extract_maildir_flags(Path::new(s)).collect()
        }

        assert_eq!(Vec::<Flag>::new(), extract("foo/bar"));
        assert_eq!(Vec::<Flag>::new(), extract("-"));
        assert_eq!(vec![Flag::Seen], extract("foo.2S"));
        assert_eq!(
            vec![Flag::Answered, Flag::Flagged, Flag::Deleted, Flag::Draft],
            extract("foo/bar.2RFxTDy")
        );
    }

    fn normalise(s: &str) -> String {
        String::from_utf8(normalise_line_endings(s.as_bytes().to_vec()))
            .unwrap()
    }

    #[test]
    fn line_ending_normalisation() {
        assert_eq!("a\r\nb\r\n", normalise("a\nb\n"));
        assert_eq!("a\r\nb\r\n", normalise("a\nb\r\n"));
        assert_eq!("\r\n\r\nx", normalise("\n\nx"));
        // DOS input is passed through even if it later has bare LFs
        assert_eq!("a\r\nb\nc", normalise("a\r\nb\nc"));
        assert_eq!("no newline", normalise("no newline"));
        assert_eq!("", normalise(""));
    }

    proptest! {
        #[test]
        fn normalisation_only_inserts_carriage_returns(
            content in "[a-c\r\n]{0,64}"
        ) {
            let output = normalise(&content);
            prop_assert_eq!(
                content.replace('\r', ""),
                output.replace('\r', "")
            );

            let was_dos = content.find('\n')
                .map_or(true, |ix| content[..ix].ends_with('\r'));
            if was_dos {
                prop_assert_eq!(&content, &output);
            } else {
                prop_assert!(!output.replace("\r\n", "").contains('\n'));
            }
        }
    }

    #[derive(Debug, Default)]
    struct MockTarget {
        delivered: Vec<(Flags, String)>,
    }

    impl DeliveryTarget for MockTarget {
        fn deliver(
            &mut self,
            flags: Flags,
            data: Vec<u8>,
        ) -> Result<Uid, Error> {
            self.delivered
                .push((flags, String::from_utf8_lossy(&data).into_owned()));
            Ok(Uid::u(self.delivered.len() as u32))
        }
    }

    fn command(flags: Vec<Flag>, maildir_flags: bool) -> DeliverSubcommand {
        DeliverSubcommand {
            user: "alice@example.com".to_owned(),
            mailbox: "INBOX".to_owned(),
            create: false,
            flag: flags,
            maildir_flags,
            inputs: vec![],
        }
    }

    #[test]
    fn deliver_unix_from_stdin() {
        let flags = vec![Flag::Answered, Flag::Keyword("plugh".to_owned())];
        let mut target = MockTarget::default();

        let uids = run_delivery(
            &command(flags.clone(), false),
            iter::once(Path::new("-").to_owned()),
            b"This is a message.\nFoo bar baz.\n" as &[u8],
            &mut target,
        )
        .unwrap();

        assert_eq!(vec![Uid::u(1)], uids);
        assert_eq!(
            vec![(
                flags.into_iter().collect::<Flags>(),
                "This is a message.\r\nFoo bar baz.\r\n".to_owned()
            )],
            target.delivered
        );
    }

    #[test]
    fn deliver_multiple_from_maildir() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let path_a = tmpdir.path().join("a.2D");
        let path_b = tmpdir.path().join("b.2RT");

        fs::File::create(&path_a)
            .unwrap()
            .write_all(b"DOS\r\nContent")
            .unwrap();
        fs::File::create(&path_b)
            .unwrap()
            .write_all(b"UNIX\nContent")
            .unwrap();

        let mut target = MockTarget::default();
        let uids = run_delivery(
            &command(vec![Flag::Flagged], true),
            vec![path_a, path_b].into_iter(),
            b"" as &[u8],
            &mut target,
        )
        .unwrap();

        assert_eq!(vec![Uid::u(1), Uid::u(2)], uids);
        assert_eq!(
            vec![
                (
                    Flags::new().with(Flag::Flagged).with(Flag::Draft),
                    "DOS\r\nContent".to_owned()
                ),
                (
                    Flags::new()
                        .with(Flag::Flagged)
                        .with(Flag::Answered)
                        .with(Flag::Deleted),
                    "UNIX\r\nContent".to_owned()
                ),
            ],
            target.delivered
        );
    }

    #[test]
    fn missing_input_is_noinput() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let mut target = MockTarget::default();
        assert_eq!(
            Err(EX_NOINPUT),
            run_delivery(
                &command(vec![], false),
                iter::once(tmpdir.path().join("nonexistent")),
                b"" as &[u8],
                &mut target,
            )
        );
        assert!(target.delivered.is_empty());
    }

    #[test]
    fn delivery_into_engine_respects_quota() {
        crate::init_test_log();

        let mut config = SystemConfig::default();
        config.quota.max_messages = Some(1);
        let engine = Engine::in_memory(&config);
        let session = MailboxSession::new("alice@example.com");
        let inbox = MailboxPath::inbox("alice@example.com");
        engine.create_mailbox(&session, &inbox).unwrap();

        let mut target = EngineTarget {
            engine: &engine,
            session: &session,
            path: &inbox,
        };
        assert_eq!(
            Ok(vec![Uid::u(1)]),
            run_delivery(
                &command(vec![Flag::Seen], false),
                iter::once(Path::new("-").to_owned()),
                b"Subject: hi\n\nbody\n" as &[u8],
                &mut target,
            )
        );
        assert_eq!(
            Err(EX_TEMPFAIL),
            run_delivery(
                &command(vec![], false),
                iter::once(Path::new("-").to_owned()),
                b"again" as &[u8],
                &mut target,
            )
        );

        let root = engine.quota_root(&inbox).unwrap();
        let (count, size) = engine.get_quotas(&root).unwrap();
        assert_eq!(1, count.used);
        assert_eq!(b"Subject: hi\r\n\r\nbody\r\n".len() as u64, size.used);
    }
}
