use bytes::Bytes;

use crate::constants::PDF_MIME;

/// A file picked on the client side, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl LocalFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn pdf(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::new(file_name, PDF_MIME, bytes)
    }

    pub fn is_pdf(&self) -> bool {
        is_pdf(&self.content_type, &self.file_name)
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// BLAKE3 digest of the content, hex encoded. Used to tell versions apart in logs.
    pub fn digest(&self) -> String {
        hex::encode(blake3::hash(&self.bytes).as_bytes())
    }
}

/// PDF detection used for both uploads and stored documents: the declared
/// content type, falling back to the file extension.
pub fn is_pdf(content_type: &str, file_name: &str) -> bool {
    content_type.eq_ignore_ascii_case(PDF_MIME) || file_name.to_ascii_lowercase().ends_with(".pdf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_detection() {
        assert!(LocalFile::new("nda.pdf", "application/pdf", vec![1]).is_pdf());
        assert!(LocalFile::new("NDA.PDF", "application/octet-stream", vec![1]).is_pdf());
        assert!(!LocalFile::new("scan.png", "image/png", vec![1]).is_pdf());
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = LocalFile::pdf("a.pdf", vec![1, 2, 3]);
        let b = LocalFile::pdf("b.pdf", vec![1, 2, 3]);
        let c = LocalFile::pdf("a.pdf", vec![3, 2, 1]);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
