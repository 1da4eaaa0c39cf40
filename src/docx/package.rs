use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, Context};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const DOCUMENT_PART: &str = "word/document.xml";

/// A `.docx` held in memory: every zip member in archive order, each remembering how it was
/// stored so an unchanged part is written back the way it came in.
pub struct DocxPackage {
    parts: Vec<Part>,
}

struct Part {
    name: String,
    data: Vec<u8>,
    options: SimpleFileOptions,
    is_dir: bool,
}

impl DocxPackage {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open docx: {}", path.display()))?;
        Self::load(f)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> anyhow::Result<Self> {
        Self::load(Cursor::new(bytes))
    }

    pub fn load<R: Read + Seek>(reader: R) -> anyhow::Result<Self> {
        let mut zip = ZipArchive::new(reader).context("not a zip archive")?;
        let mut parts = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut member = zip.by_index(i).context("zip member")?;
            let mut data = Vec::with_capacity(member.size() as usize);
            member
                .read_to_end(&mut data)
                .with_context(|| format!("read part: {}", member.name()))?;
            let mut options = SimpleFileOptions::default()
                .compression_method(member.compression())
                .last_modified_time(member.last_modified().unwrap_or_default());
            if let Some(mode) = member.unix_mode() {
                options = options.unix_permissions(mode);
            }
            parts.push(Part {
                name: member.name().to_string(),
                is_dir: member.is_dir(),
                data,
                options,
            });
        }
        Ok(Self { parts })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.data.as_slice())
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    /// Swaps the bytes of an existing part. Adding parts is not supported: a rendered template
    /// has exactly the members of its source.
    pub fn replace_part(&mut self, name: &str, data: Vec<u8>) -> anyhow::Result<()> {
        let part = self
            .parts
            .iter_mut()
            .find(|p| p.name == name && !p.is_dir)
            .ok_or_else(|| anyhow!("no such part: {name}"))?;
        part.data = data;
        Ok(())
    }

    pub fn write_to<W: Write + Seek>(&self, writer: W) -> anyhow::Result<()> {
        let mut zout = ZipWriter::new(writer);
        for part in &self.parts {
            if part.is_dir || part.name.ends_with('/') {
                zout.add_directory(part.name.as_str(), part.options)
                    .with_context(|| format!("add zip dir: {}", part.name))?;
                continue;
            }
            zout.start_file(part.name.as_str(), part.options)
                .with_context(|| format!("start part: {}", part.name))?;
            zout.write_all(&part.data)
                .with_context(|| format!("write part: {}", part.name))?;
        }
        zout.finish().context("finish zip")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::CompressionMethod;

    fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, data) in entries {
            zout.start_file(*name, stored).expect("start");
            zout.write_all(data).expect("write");
        }
        zout.finish().expect("finish").into_inner()
    }

    #[test]
    fn replacing_a_part_leaves_the_others_alone() {
        let bytes = build(&[
            ("[Content_Types].xml", b"<Types/>"),
            (DOCUMENT_PART, b"<w:document/>"),
        ]);
        let mut pkg = DocxPackage::from_bytes(bytes).expect("read");
        pkg.replace_part(DOCUMENT_PART, b"<new/>".to_vec())
            .expect("replace");

        let mut out = Cursor::new(Vec::new());
        pkg.write_to(&mut out).expect("write");
        let again = DocxPackage::from_bytes(out.into_inner()).expect("reread");

        let names: Vec<&str> = again.part_names().collect();
        assert_eq!(names, vec!["[Content_Types].xml", DOCUMENT_PART]);
        assert_eq!(again.part("[Content_Types].xml"), Some(&b"<Types/>"[..]));
        assert_eq!(again.part(DOCUMENT_PART), Some(&b"<new/>"[..]));
    }

    #[test]
    fn unknown_part_cannot_be_replaced() {
        let mut pkg = DocxPackage::from_bytes(build(&[(DOCUMENT_PART, b"<w:document/>")]))
            .expect("read");
        assert!(pkg.replace_part("word/header1.xml", Vec::new()).is_err());
    }
}
