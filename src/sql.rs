use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::parser::comments::{CommentRecord, IdentityProvider};
use crate::parser::NoteRecord;

const NOTES_FILE: &str = "dump.sql";
const TAGS_FILE: &str = "dump2.sql";
const COMMENTS_FILE: &str = "dump3.sql";

/// SQL import script for the e2 blog, split into notes, tags and comments.
pub struct SqlDump {
    notes: BufWriter<File>,
    tags: BufWriter<File>,
    comments: BufWriter<File>,
}

impl SqlDump {
    /// Truncates any previous dump in `dir` and writes the table resets.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        let open = |name: &str| -> Result<BufWriter<File>> {
            let path = dir.join(name);
            let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
            Ok(BufWriter::new(file))
        };

        let mut dump = SqlDump {
            notes: open(NOTES_FILE)?,
            tags: open(TAGS_FILE)?,
            comments: open(COMMENTS_FILE)?,
        };

        writeln!(dump.notes, "TRUNCATE TABLE e2BlogNotes;")?;
        writeln!(dump.notes, "TRUNCATE TABLE e2BlogAliases;")?;
        writeln!(dump.tags, "TRUNCATE TABLE e2BlogKeywords;")?;
        writeln!(dump.tags, "TRUNCATE TABLE e2BlogNotesKeywords;")?;
        writeln!(dump.comments, "TRUNCATE TABLE e2BlogComments;")?;
        Ok(dump)
    }

    /// Appends everything one note contributes to the three scripts.
    pub fn write_note(&mut self, note: &NoteRecord, alias: &str) -> Result<()> {
        let stamp = note.created.timestamp();
        let offset_hours = note.created.offset().local_minus_utc() / 3600;

        write!(
            self.notes,
            "INSERT INTO e2BlogNotes\n\
             (\n    \
                 Title, Text, FormatterID, Uploads, IsPublished, IsCommentable, IsVisible,\n    \
                 IsFavourite, Stamp, LastModified, Offset, IsDST, IsIndexed, IsExternal,\n    \
                 SourceID, SourceNoteURL\n\
             ) VALUES (\n    \
                 '{}', '{}', 'neasden', '{}', 1, 1, 1, 0,\n    \
                 {stamp}, {stamp}, {} * 60 * 60, 0, 0, 0, 0, 0\n\
             );\n\n",
            escape(&note.title),
            escape(&note.body),
            escape(&serialize_uploads(&note.image_refs)),
            offset_hours,
        )?;

        if !alias.is_empty() {
            write!(
                self.notes,
                "INSERT INTO e2BlogAliases (EntityType, EntityID, Alias, Stamp)\n\
                 SELECT 'n', n.ID, '{}', {stamp}\n\
                 FROM e2BlogNotes n\n\
                 WHERE Stamp={stamp};\n\n",
                escape(alias),
            )?;
        }

        for tag in &note.tags {
            let alias = escape(&tag.slug);
            write!(
                self.tags,
                "INSERT INTO e2BlogKeywords (Keyword, OriginalAlias, Uploads, IsFavourite)\n\
                 SELECT '{}', '{alias}', 'a:0:{{}}', 0\n\
                 FROM DUAL\n\
                 WHERE NOT EXISTS (\n    \
                     SELECT * FROM e2BlogKeywords\n    \
                     WHERE OriginalAlias='{alias}' LIMIT 1\n\
                 );\n\n\
                 INSERT INTO e2BlogNotesKeywords(SubsetID, NoteID, KeywordID)\n\
                 SELECT 0, n.ID, (SELECT ID FROM e2BlogKeywords WHERE OriginalAlias='{alias}' LIMIT 1)\n\
                 FROM e2BlogNotes n\n\
                 WHERE Stamp={stamp};\n\n",
                escape(&tag.text),
            )?;
        }

        for comment in &note.comments {
            self.write_comment(comment, stamp)?;
        }
        Ok(())
    }

    fn write_comment(&mut self, comment: &CommentRecord, note_stamp: i64) -> Result<()> {
        let stamp = comment.created.timestamp();
        let gip_used = u8::from(comment.provider != IdentityProvider::None);

        write!(
            self.comments,
            "INSERT INTO e2BlogComments\n\
             (\n    \
                 NoteID, AuthorName, AuthorEmail, Text, Reply, IsVisible, IsAnswerAware,\n    \
                 IsSubscriber, IsSpam, IsNew, Stamp, LastModified, IP,\n    \
                 IsGIPUsed, GIP, GIPAuthorID\n\
             )\n\
             SELECT n.ID, '{}', '', '{}', '', 1, 0,\n    \
                 0, 0, 0, {stamp}, {stamp}, '',\n    \
                 {gip_used}, '{}', '{}'\n\
             FROM e2BlogNotes n\n\
             WHERE Stamp={note_stamp};\n\n",
            escape(&comment.author),
            escape(&comment.text),
            comment.provider.as_str(),
            escape(comment.account_key.as_deref().unwrap_or_default()),
        )?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.notes.flush()?;
        self.tags.flush()?;
        self.comments.flush()?;
        Ok(())
    }
}

/// Quote-safe literal body, matching PHP `addcslashes($s, "\n\r\0'")`.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\000"),
            '\'' => out.push_str("\\'"),
            c => out.push(c),
        }
    }
    out
}

/// PHP `serialize()` of a list of file names.
fn serialize_uploads(names: &[String]) -> String {
    let items: String = names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("i:{};s:{}:\"{}\";", i, name.len(), name))
        .collect();
    format!("a:{}:{{{}}}", names.len(), items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::links::TagLink;
    use chrono::{FixedOffset, TimeZone};

    fn note() -> NoteRecord {
        let created = FixedOffset::east_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2017, 9, 23, 1, 58, 0)
            .unwrap();
        NoteRecord {
            created,
            title: "Осень в 'Коломенском'".into(),
            body: "Строка\nещё".into(),
            tags: vec![TagLink {
                raw_href: "tag/osen/".into(),
                slug: "osen".into(),
                text: "осень".into(),
            }],
            image_refs: vec!["2017.09.23.01.58.1.jpg".into()],
            comments: vec![CommentRecord {
                author: "Маша".into(),
                text: "Класс!".into(),
                created: created + chrono::Duration::hours(7),
                provider: IdentityProvider::Email,
                account_key: Some("0123456789abcdef0123456789abcdef".into()),
                avatar_url: None,
                avatar_name: None,
            }],
        }
    }

    #[test]
    fn escapes_like_addcslashes() {
        assert_eq!(escape("it's\n\r\0ok\\"), "it\\'s\\n\\r\\000ok\\");
        assert_eq!(escape("обычный"), "обычный");
    }

    #[test]
    fn uploads_are_php_serialized() {
        assert_eq!(serialize_uploads(&[]), "a:0:{}");
        assert_eq!(
            serialize_uploads(&["a.jpg".into(), "2017.09.23.01.58.2@2x.jpg".into()]),
            r#"a:2:{i:0;s:5:"a.jpg";i:1;s:25:"2017.09.23.01.58.2@2x.jpg";}"#
        );
    }

    #[test]
    fn writes_three_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let mut dump = SqlDump::create(dir.path()).unwrap();
        dump.write_note(&note(), "osen-v-kolomenskom").unwrap();
        dump.finish().unwrap();

        let notes = std::fs::read_to_string(dir.path().join(NOTES_FILE)).unwrap();
        assert!(notes.starts_with("TRUNCATE TABLE e2BlogNotes;\nTRUNCATE TABLE e2BlogAliases;\n"));
        assert!(notes.contains("'Осень в \\'Коломенском\\'', 'Строка\\nещё', 'neasden'"));
        assert!(notes.contains(r#"'a:1:{i:0;s:22:"2017.09.23.01.58.1.jpg";}'"#));
        assert!(notes.contains("1506121080, 1506121080, 3 * 60 * 60"));
        assert!(notes.contains("SELECT 'n', n.ID, 'osen-v-kolomenskom', 1506121080"));

        let tags = std::fs::read_to_string(dir.path().join(TAGS_FILE)).unwrap();
        assert!(tags.starts_with("TRUNCATE TABLE e2BlogKeywords;\nTRUNCATE TABLE e2BlogNotesKeywords;\n"));
        assert!(tags.contains("SELECT 'осень', 'osen', 'a:0:{}', 0"));
        assert!(tags.contains("WHERE Stamp=1506121080;"));

        let comments = std::fs::read_to_string(dir.path().join(COMMENTS_FILE)).unwrap();
        assert!(comments.starts_with("TRUNCATE TABLE e2BlogComments;\n"));
        assert!(comments.contains("SELECT n.ID, 'Маша', '', 'Класс!'"));
        assert!(comments.contains("1506146280, 1506146280"));
        assert!(comments.contains("1, 'email', '0123456789abcdef0123456789abcdef'"));
        assert!(comments.contains("WHERE Stamp=1506121080;"));
    }

    #[test]
    fn offset_follows_the_note() {
        let mut summer_2012 = note();
        summer_2012.created = FixedOffset::east_opt(4 * 3600)
            .unwrap()
            .with_ymd_and_hms(2012, 6, 1, 12, 0, 0)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut dump = SqlDump::create(dir.path()).unwrap();
        dump.write_note(&summer_2012, "").unwrap();
        dump.finish().unwrap();

        let notes = std::fs::read_to_string(dir.path().join(NOTES_FILE)).unwrap();
        assert!(notes.contains("1338537600, 1338537600, 4 * 60 * 60"));
    }

    #[test]
    fn empty_alias_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut dump = SqlDump::create(dir.path()).unwrap();
        dump.write_note(&note(), "").unwrap();
        dump.finish().unwrap();

        let notes = std::fs::read_to_string(dir.path().join(NOTES_FILE)).unwrap();
        assert!(!notes.contains("INSERT INTO e2BlogAliases"));
    }
}
