//! Maildir mailbox session
//!
//! Reads messages from a Maildir tree and applies actions by renaming files.
//!
//! Directory structure:
//! ```text
//! <root>/
//!   cur/ new/ tmp/        # INBOX
//!   Bounces/
//!     cur/ new/ tmp/
//!   .Processed/           # Maildir++ style folders are found too
//!     cur/ new/ tmp/
//! ```
//!
//! Flags live in the `:2,` info suffix of each file name. Messages carrying
//! the Seen (`S`) or Trashed (`T`) flag count as already processed and are
//! skipped by `fetch_batch`; every mutating action sets `S`.

use super::{MailboxAction, MailboxError, MailboxSession, Result};
use crate::mail::{Message, Uid};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const INFO_SEPARATOR: &str = ":2,";

/// Maildir-backed mailbox session
pub struct MaildirMailbox {
    root: PathBuf,
    expunge_on_close: bool,
    initialized: bool,
    selected: Option<SelectedBox>,
}

struct SelectedBox {
    name: String,
    dir: PathBuf,
    entries: Vec<MaildirEntry>,
    cursor: usize,
}

struct MaildirEntry {
    uid: Uid,
    path: PathBuf,
}

impl MaildirMailbox {
    /// Create a session rooted at a Maildir directory
    pub fn new(root: impl Into<PathBuf>, expunge_on_close: bool) -> Self {
        Self {
            root: root.into(),
            expunge_on_close,
            initialized: false,
            selected: None,
        }
    }

    /// Name of the currently selected box
    pub fn box_name(&self) -> Option<&str> {
        self.selected.as_ref().map(|b| b.name.as_str())
    }

    /// Resolve a box name to its directory
    fn box_dir(&self, name: &str) -> Option<PathBuf> {
        find_box_dir(&self.root, name)
    }

    fn selected_mut(&mut self) -> Result<&mut SelectedBox> {
        self.selected.as_mut().ok_or(MailboxError::NotSelected)
    }

    /// Rename a message so its flags include `add`, moving it into `cur/`
    fn set_flags(path: &Path, dir: &Path, add: &str) -> Result<PathBuf> {
        let file_name = file_name_of(path)?;
        let (base, flags) = split_flags(&file_name);
        let merged: BTreeSet<char> = flags.chars().chain(add.chars()).collect();
        let flags: String = merged.into_iter().collect();

        let target = dir
            .join("cur")
            .join(format!("{}{}{}", base, INFO_SEPARATOR, flags));
        if target != path {
            fs::rename(path, &target)?;
        }
        Ok(target)
    }

    fn expunge(dir: &Path) -> Result<usize> {
        let mut removed = 0;
        for path in list_messages(dir)? {
            let file_name = file_name_of(&path)?;
            if split_flags(&file_name).1.contains('T') {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl MailboxSession for MaildirMailbox {
    fn initialize(&mut self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(MailboxError::Connect(format!(
                "Maildir root not found: {}",
                self.root.display()
            )));
        }
        tracing::info!(root = %self.root.display(), "Opened Maildir store");
        self.initialized = true;
        Ok(())
    }

    fn set_box_name(&mut self, name: &str) -> Result<()> {
        if !self.initialized {
            return Err(MailboxError::Connect("session not initialized".to_string()));
        }
        if self.selected.is_some() {
            self.close()?;
        }

        let dir = self
            .box_dir(name)
            .ok_or_else(|| MailboxError::NoSuchBox(name.to_string()))?;

        let entries = list_messages(&dir)?
            .into_iter()
            .enumerate()
            .map(|(idx, path)| MaildirEntry {
                uid: idx as Uid + 1,
                path,
            })
            .collect::<Vec<_>>();

        tracing::debug!(mailbox = name, messages = entries.len(), "Selected mailbox");

        self.selected = Some(SelectedBox {
            name: name.to_string(),
            dir,
            entries,
            cursor: 0,
        });
        Ok(())
    }

    fn fetch_batch(&mut self, size: usize) -> Result<Vec<Message>> {
        let selected = self.selected_mut()?;
        let mut batch = Vec::new();

        while batch.len() < size && selected.cursor < selected.entries.len() {
            let entry = &selected.entries[selected.cursor];
            selected.cursor += 1;

            let file_name = file_name_of(&entry.path)?;
            let flags = split_flags(&file_name).1;
            if flags.contains('S') || flags.contains('T') {
                continue;
            }

            let raw = match fs::read(&entry.path) {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(uid = entry.uid, "Message vanished before fetch");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let mut message = Message::new(entry.uid, raw);
            if let Ok(modified) = fs::metadata(&entry.path).and_then(|m| m.modified()) {
                message = message.with_received_at(DateTime::<Utc>::from(modified));
            }
            batch.push(message);
        }

        Ok(batch)
    }

    fn apply_action(&mut self, message: &Message, action: &MailboxAction) -> Result<()> {
        let root = self.root.clone();
        let selected = self.selected_mut()?;
        let dir = selected.dir.clone();
        let entry = selected
            .entries
            .iter_mut()
            .find(|e| e.uid == message.uid())
            .ok_or(MailboxError::MessageGone(message.uid()))?;

        if !entry.path.exists() {
            return Err(MailboxError::MessageGone(message.uid()));
        }

        match action {
            MailboxAction::None => {}
            MailboxAction::Read => entry.path = Self::set_flags(&entry.path, &dir, "S")?,
            MailboxAction::Flag => entry.path = Self::set_flags(&entry.path, &dir, "FS")?,
            MailboxAction::Delete => entry.path = Self::set_flags(&entry.path, &dir, "ST")?,
            MailboxAction::Move(target) => {
                let target_dir = move_target_dir(&root, target)?;
                for sub in ["cur", "new", "tmp"] {
                    fs::create_dir_all(target_dir.join(sub))?;
                }
                let seen = Self::set_flags(&entry.path, &dir, "S")?;
                let moved = target_dir.join("cur").join(file_name_of(&seen)?);
                fs::rename(&seen, &moved)?;
                entry.path = moved;
            }
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(selected) = self.selected.take() {
            if self.expunge_on_close {
                let removed = Self::expunge(&selected.dir)?;
                tracing::debug!(mailbox = %selected.name, removed, "Expunged deleted messages");
            }
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.initialized = false;
        Ok(())
    }
}

fn find_box_dir(root: &Path, name: &str) -> Option<PathBuf> {
    let candidates = if name.eq_ignore_ascii_case("INBOX") {
        vec![root.to_path_buf(), root.join(name)]
    } else {
        vec![root.join(name), root.join(format!(".{}", name))]
    };
    candidates.into_iter().find(|dir| is_maildir(dir))
}

/// Directory for a move target
///
/// Existing boxes are reused. A new box follows the store's layout:
/// `.<name>` when Maildir++ folders are present, else `<name>`.
fn move_target_dir(root: &Path, name: &str) -> Result<PathBuf> {
    if let Some(dir) = find_box_dir(root, name) {
        return Ok(dir);
    }
    if uses_dotted_folders(root)? {
        Ok(root.join(format!(".{}", name)))
    } else {
        Ok(root.join(name))
    }
}

fn uses_dotted_folders(root: &Path) -> Result<bool> {
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let dotted = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.len() > 1 && n.starts_with('.'))
            .unwrap_or(false);
        if dotted && is_maildir(&path) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_maildir(dir: &Path) -> bool {
    dir.join("cur").is_dir() || dir.join("new").is_dir()
}

/// Message files in `new/` then `cur/`, each sorted by name (delivery order)
fn list_messages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut all = Vec::new();
    for sub in ["new", "cur"] {
        let sub_dir = dir.join(sub);
        if !sub_dir.is_dir() {
            continue;
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&sub_dir)? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        all.extend(paths);
    }
    Ok(all)
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| MailboxError::Io(std::io::Error::other("message path has no file name")))
}

/// Split `base:2,FLAGS` into `(base, FLAGS)`
fn split_flags(file_name: &str) -> (&str, &str) {
    match file_name.rsplit_once(INFO_SEPARATOR) {
        Some((base, flags)) => (base, flags),
        None => (file_name, ""),
    }
}
