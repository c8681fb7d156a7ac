//! Archive Corruptor (spec §4.E): byte-level, deterministic corruption of
//! ZIP archives at structurally meaningful offsets.

mod zip;

pub use zip::{
    CENTRAL_DIR_SIG, DATA_DESCRIPTOR_SIG, EOCD_SEARCH_WINDOW, EOCD_SIG, EocdView,
    LOCAL_FILE_HEADER_SIG, LocalHeaderView, ZipStructure,
};

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use crate::rng::DeterministicStream;

#[derive(Debug, thiserror::Error)]
pub enum CorruptionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("archive has no local file header to target")]
    NoLocalHeader,
    #[error("archive has no end-of-central-directory record")]
    NoEocd,
    #[error("no backup found at {0}")]
    NoBackup(PathBuf),
    #[error("no entry named {0:?} found in archive")]
    TargetFileNotFound(String),
}

pub type Result<T> = std::result::Result<T, CorruptionError>;

/// The eight corruption types from spec §4.E's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorruptionType {
    Crc,
    Header,
    Truncate,
    CentralDir,
    LocalHeader,
    Data,
    Signature,
    Comment,
}

/// A corruption to apply to an archive.
#[derive(Debug, Clone)]
pub struct CorruptionPlan {
    pub archive_path: PathBuf,
    pub backup_path: PathBuf,
    pub corruption_type: CorruptionType,
    pub seed: i64,
    pub target_file: Option<String>,
    pub corruption_size: Option<u64>,
    pub severity: f64,
}

impl CorruptionPlan {
    pub fn new(archive_path: impl Into<PathBuf>, corruption_type: CorruptionType) -> Self {
        let archive_path = archive_path.into();
        let backup_path = default_backup_path(&archive_path);
        Self {
            archive_path,
            backup_path,
            corruption_type,
            seed: 0,
            target_file: None,
            corruption_size: None,
            severity: 0.5,
        }
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_target_file(mut self, name: impl Into<String>) -> Self {
        self.target_file = Some(name.into());
        self
    }

    pub fn with_corruption_size(mut self, bytes: u64) -> Self {
        self.corruption_size = Some(bytes);
        self
    }

    pub fn with_severity(mut self, severity: f64) -> Self {
        self.severity = severity.clamp(0.0, 1.0);
        self
    }
}

fn default_backup_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(".corruption-backup");
    PathBuf::from(name)
}

/// What changed after a corruption was applied.
#[derive(Debug, Clone)]
pub struct CorruptionResult {
    pub corruption_type: CorruptionType,
    pub applied_at: Vec<u64>,
    pub original_bytes: Vec<u8>,
    pub new_bytes: Vec<u8>,
    pub description: String,
    pub recoverable: Option<bool>,
}

/// What corruption types an archive appears to exhibit (spec §4.E's
/// detection companion).
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    pub types: Vec<CorruptionType>,
    pub details: Vec<String>,
}

/// Applies, restores and detects corruption in ZIP archives.
pub struct ArchiveCorruptor;

impl Default for ArchiveCorruptor {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveCorruptor {
    pub fn new() -> Self {
        Self
    }

    /// Take a side-by-side backup, then mutate the archive per `plan`.
    pub fn apply(&self, plan: &CorruptionPlan) -> Result<CorruptionResult> {
        fs::copy(&plan.archive_path, &plan.backup_path)?;
        let mut data = fs::read(&plan.archive_path)?;

        if data.is_empty() {
            return Ok(CorruptionResult {
                corruption_type: plan.corruption_type,
                applied_at: Vec::new(),
                original_bytes: Vec::new(),
                new_bytes: Vec::new(),
                description: "archive is empty; corruption has no effect".to_string(),
                recoverable: Some(true),
            });
        }

        let stream = DeterministicStream::new(plan.seed);
        let result = match plan.corruption_type {
            CorruptionType::Crc => apply_crc(&mut data, plan, &stream)?,
            CorruptionType::Header => apply_header(&mut data, plan, &stream)?,
            CorruptionType::Truncate => apply_truncate(&mut data, plan),
            CorruptionType::CentralDir => apply_central_dir(&mut data, plan, &stream)?,
            CorruptionType::LocalHeader => apply_local_header_versions(&mut data, plan, &stream)?,
            CorruptionType::Data => apply_data(&mut data, plan, &stream)?,
            CorruptionType::Signature => apply_signature(&mut data, plan, &stream),
            CorruptionType::Comment => apply_comment(&mut data, plan)?,
        };

        fs::write(&plan.archive_path, &data)?;
        tracing::debug!(
            corruption = ?plan.corruption_type,
            archive = %plan.archive_path.display(),
            offsets = ?result.applied_at,
            "applied archive corruption"
        );
        Ok(result)
    }

    /// Move the backup back over the archive, reinstating byte-exact
    /// contents.
    pub fn restore(&self, plan: &CorruptionPlan) -> Result<()> {
        if !plan.backup_path.exists() {
            return Err(CorruptionError::NoBackup(plan.backup_path.clone()));
        }
        if fs::rename(&plan.backup_path, &plan.archive_path).is_err() {
            fs::copy(&plan.backup_path, &plan.archive_path)?;
            fs::remove_file(&plan.backup_path)?;
        }
        Ok(())
    }

    /// Remove the backup if it is still present.
    pub fn cleanup(&self, plan: &CorruptionPlan) -> Result<()> {
        if plan.backup_path.exists() {
            fs::remove_file(&plan.backup_path)?;
        }
        Ok(())
    }

    /// Report the set of corruption types an archive appears to exhibit.
    pub fn detect(&self, archive_path: &Path) -> Result<DetectionReport> {
        let data = fs::read(archive_path)?;
        let mut report = DetectionReport::default();
        if data.is_empty() {
            report.details.push("archive is empty".to_string());
            return Ok(report);
        }

        let structure = ZipStructure::scan(&data);
        let mut found = HashSet::new();

        let window_start = data.len().saturating_sub(EOCD_SEARCH_WINDOW);
        let eocd_in_window = structure.eocd.iter().any(|&offset| offset >= window_start);
        if !eocd_in_window {
            found.insert(CorruptionType::Truncate);
            report
                .details
                .push("no end-of-central-directory record found in the trailing window".to_string());
        }

        if data.len() >= 4 {
            let first = LittleEndian::read_u32(&data[0..4]);
            let known = [LOCAL_FILE_HEADER_SIG, EOCD_SIG, CENTRAL_DIR_SIG, DATA_DESCRIPTOR_SIG];
            if !known.contains(&first) {
                found.insert(CorruptionType::Signature);
                report.details.push("first four bytes are not a known ZIP signature".to_string());
            }
        }

        for &start in &structure.local_headers {
            match LocalHeaderView::parse(&data, start) {
                None => {
                    found.insert(CorruptionType::Header);
                    report.details.push(format!("malformed local header at offset {start}"));
                }
                Some(view) => {
                    let data_off = view.data_offset();
                    let data_len = view.data_len();
                    if data_off.saturating_add(data_len) > data.len() {
                        found.insert(CorruptionType::Data);
                        report
                            .details
                            .push(format!("entry at offset {start} declares more data than the archive holds"));
                    } else if view.method == 0 {
                        let actual = crc32fast::hash(&data[data_off..data_off + data_len]);
                        let declared =
                            LittleEndian::read_u32(&data[view.crc32_offset..view.crc32_offset + 4]);
                        if actual != declared {
                            found.insert(CorruptionType::Crc);
                            report.details.push(format!("CRC-32 mismatch for entry at offset {start}"));
                        }
                    }
                }
            }
        }

        report.types = found.into_iter().collect();
        Ok(report)
    }
}

fn replacement_bytes(stream: &DeterministicStream, context: u64, len: usize, seed: i64, default: &[u8]) -> Vec<u8> {
    if seed == 0 {
        default.to_vec()
    } else {
        let mut buf = vec![0u8; len];
        stream.fill_bytes(context, &mut buf);
        buf
    }
}

fn locate_target_header(
    data: &[u8],
    structure: &ZipStructure,
    target_file: Option<&str>,
) -> Result<LocalHeaderView> {
    if let Some(name) = target_file {
        for &start in &structure.local_headers {
            if let Some(view) = LocalHeaderView::parse(data, start)
                && view.filename(data) == Some(name)
            {
                return Ok(view);
            }
        }
        return Err(CorruptionError::TargetFileNotFound(name.to_string()));
    }
    structure
        .first_local_header()
        .and_then(|start| LocalHeaderView::parse(data, start))
        .ok_or(CorruptionError::NoLocalHeader)
}

fn apply_crc(data: &mut [u8], plan: &CorruptionPlan, stream: &DeterministicStream) -> Result<CorruptionResult> {
    let structure = ZipStructure::scan(data);
    let view = locate_target_header(data, &structure, plan.target_file.as_deref())?;
    let offset = view.crc32_offset;
    let original = data[offset..offset + 4].to_vec();
    let replacement = replacement_bytes(stream, offset as u64, 4, plan.seed, &[0, 0, 0, 0]);
    data[offset..offset + 4].copy_from_slice(&replacement);
    Ok(CorruptionResult {
        corruption_type: CorruptionType::Crc,
        applied_at: vec![offset as u64],
        original_bytes: original,
        new_bytes: replacement,
        description: format!("zeroed/re-seeded CRC-32 of the entry at local header offset {}", view.start),
        recoverable: Some(true),
    })
}

fn apply_header(data: &mut [u8], plan: &CorruptionPlan, stream: &DeterministicStream) -> Result<CorruptionResult> {
    let structure = ZipStructure::scan(data);
    let start = structure.first_local_header().ok_or(CorruptionError::NoLocalHeader)?;
    let sig_original = data[start..start + 4].to_vec();
    let ver_original = data[start + 4..start + 6].to_vec();

    let sig_replacement = replacement_bytes(stream, start as u64, 4, plan.seed, &[0xDE, 0xAD, 0xBE, 0xEF]);
    data[start..start + 4].copy_from_slice(&sig_replacement);
    data[start + 4..start + 6].copy_from_slice(&[0xFF, 0xFF]);

    let mut original_bytes = sig_original;
    original_bytes.extend(ver_original);
    let mut new_bytes = sig_replacement;
    new_bytes.extend_from_slice(&[0xFF, 0xFF]);

    Ok(CorruptionResult {
        corruption_type: CorruptionType::Header,
        applied_at: vec![start as u64, (start + 4) as u64],
        original_bytes,
        new_bytes,
        description: format!("overwrote local header signature and version at offset {start}"),
        recoverable: Some(false),
    })
}

fn apply_truncate(data: &mut Vec<u8>, plan: &CorruptionPlan) -> CorruptionResult {
    let size = data.len() as u64;
    let cut = plan
        .corruption_size
        .unwrap_or_else(|| ((1.0 - plan.severity) * size as f64) as u64)
        .min(size);
    let new_len = (size - cut) as usize;
    let original = data[new_len..].to_vec();
    data.truncate(new_len);
    CorruptionResult {
        corruption_type: CorruptionType::Truncate,
        applied_at: vec![new_len as u64],
        original_bytes: original,
        new_bytes: Vec::new(),
        description: format!("truncated archive to {new_len} bytes (removed {cut})"),
        recoverable: Some(false),
    }
}

fn apply_central_dir(
    data: &mut [u8],
    plan: &CorruptionPlan,
    stream: &DeterministicStream,
) -> Result<CorruptionResult> {
    let structure = ZipStructure::scan(data);
    let eocd_start = structure.last_eocd().ok_or(CorruptionError::NoEocd)?;
    let view = EocdView::parse(data, eocd_start).ok_or(CorruptionError::NoEocd)?;
    let offset = view.cd_offset_field;
    let original = data[offset..offset + 4].to_vec();
    let replacement = replacement_bytes(stream, offset as u64, 4, plan.seed, &[0xFF, 0xFF, 0xFF, 0xFF]);
    data[offset..offset + 4].copy_from_slice(&replacement);
    Ok(CorruptionResult {
        corruption_type: CorruptionType::CentralDir,
        applied_at: vec![offset as u64],
        original_bytes: original,
        new_bytes: replacement,
        description: format!("overwrote central-directory offset field at EOCD offset {eocd_start}"),
        recoverable: Some(false),
    })
}

fn apply_local_header_versions(
    data: &mut [u8],
    plan: &CorruptionPlan,
    stream: &DeterministicStream,
) -> Result<CorruptionResult> {
    let structure = ZipStructure::scan(data);
    if structure.local_headers.is_empty() {
        return Err(CorruptionError::NoLocalHeader);
    }
    let mut applied_at = Vec::new();
    let mut original_bytes = Vec::new();
    let mut new_bytes = Vec::new();
    for &start in &structure.local_headers {
        let Some(view) = LocalHeaderView::parse(data, start) else {
            continue;
        };
        let offset = view.version_offset;
        original_bytes.extend_from_slice(&data[offset..offset + 2]);
        let replacement = replacement_bytes(stream, offset as u64, 2, plan.seed, &[0xFF, 0xFF]);
        data[offset..offset + 2].copy_from_slice(&replacement);
        new_bytes.extend_from_slice(&replacement);
        applied_at.push(offset as u64);
    }
    Ok(CorruptionResult {
        corruption_type: CorruptionType::LocalHeader,
        applied_at,
        original_bytes,
        new_bytes,
        description: "overwrote the version field of every local file header".to_string(),
        recoverable: Some(true),
    })
}

fn apply_data(data: &mut [u8], plan: &CorruptionPlan, stream: &DeterministicStream) -> Result<CorruptionResult> {
    let structure = ZipStructure::scan(data);
    let start = structure.first_local_header().ok_or(CorruptionError::NoLocalHeader)?;
    let view = LocalHeaderView::parse(data, start).ok_or(CorruptionError::NoLocalHeader)?;
    let data_off = view.data_offset();
    let data_len = view.data_len();
    let corrupt_len = (data_len / 10).clamp(0, 100).min(data_len);

    if corrupt_len == 0 || data_off + corrupt_len > data.len() {
        return Ok(CorruptionResult {
            corruption_type: CorruptionType::Data,
            applied_at: Vec::new(),
            original_bytes: Vec::new(),
            new_bytes: Vec::new(),
            description: "entry has no data region to corrupt".to_string(),
            recoverable: Some(true),
        });
    }

    let original = data[data_off..data_off + corrupt_len].to_vec();
    let zeros = vec![0u8; corrupt_len];
    let replacement = replacement_bytes(stream, data_off as u64, corrupt_len, plan.seed, &zeros);
    data[data_off..data_off + corrupt_len].copy_from_slice(&replacement);

    Ok(CorruptionResult {
        corruption_type: CorruptionType::Data,
        applied_at: vec![data_off as u64],
        original_bytes: original,
        new_bytes: replacement,
        description: format!("overwrote the first {corrupt_len} bytes of entry data at offset {data_off}"),
        recoverable: Some(true),
    })
}

fn apply_signature(data: &mut [u8], plan: &CorruptionPlan, stream: &DeterministicStream) -> CorruptionResult {
    let len = data.len().min(4);
    let original = data[0..len].to_vec();
    let replacement = replacement_bytes(stream, 0, len, plan.seed, &[0, 0, 0, 0][..len]);
    data[0..len].copy_from_slice(&replacement);
    CorruptionResult {
        corruption_type: CorruptionType::Signature,
        applied_at: vec![0],
        original_bytes: original,
        new_bytes: replacement,
        description: "overwrote the first four bytes of the archive".to_string(),
        recoverable: Some(false),
    }
}

fn apply_comment(data: &mut Vec<u8>, plan: &CorruptionPlan) -> Result<CorruptionResult> {
    let structure = ZipStructure::scan(data);
    let eocd_start = structure.last_eocd().ok_or(CorruptionError::NoEocd)?;
    let view = EocdView::parse(data, eocd_start).ok_or(CorruptionError::NoEocd)?;

    let old_comment_start = eocd_start + 22;
    let mut original = data[view.comment_len_field..view.comment_len_field + 2].to_vec();
    original.extend_from_slice(&data[old_comment_start..]);

    let comment: Vec<u8> = if plan.seed == 0 {
        b"CORRUPTED!".to_vec()
    } else {
        format!("SEED:{}", plan.seed).into_bytes()
    };
    let len_bytes = (comment.len() as u16).to_le_bytes();
    data[view.comment_len_field..view.comment_len_field + 2].copy_from_slice(&len_bytes);
    data.truncate(old_comment_start);
    data.extend_from_slice(&comment);

    let mut new_bytes = len_bytes.to_vec();
    new_bytes.extend_from_slice(&comment);

    Ok(CorruptionResult {
        corruption_type: CorruptionType::Comment,
        applied_at: vec![view.comment_len_field as u64],
        original_bytes: original,
        new_bytes,
        description: format!("rewrote EOCD comment ({} bytes)", comment.len()),
        recoverable: Some(true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Build a tiny single-entry, stored (uncompressed) ZIP archive with a
    /// correct CRC, for corruption tests.
    fn build_test_zip(dir: &Path, name: &str, filename: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut buf = Vec::new();
        let crc = crc32fast::hash(contents);

        let local_header_start = buf.len();
        buf.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes()); // version
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&0u16.to_le_bytes()); // method = stored
        buf.extend_from_slice(&0u16.to_le_bytes()); // time
        buf.extend_from_slice(&0u16.to_le_bytes()); // date
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(filename.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // extra len
        buf.extend_from_slice(filename.as_bytes());
        buf.extend_from_slice(contents);

        let cd_start = buf.len();
        buf.extend_from_slice(&CENTRAL_DIR_SIG.to_le_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes()); // version made by
        buf.extend_from_slice(&20u16.to_le_bytes()); // version needed
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&0u16.to_le_bytes()); // method
        buf.extend_from_slice(&0u16.to_le_bytes()); // time
        buf.extend_from_slice(&0u16.to_le_bytes()); // date
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(filename.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // extra len
        buf.extend_from_slice(&0u16.to_le_bytes()); // comment len
        buf.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        buf.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        buf.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        buf.extend_from_slice(&(local_header_start as u32).to_le_bytes());
        buf.extend_from_slice(filename.as_bytes());
        let cd_size = buf.len() - cd_start;

        buf.extend_from_slice(&EOCD_SIG.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&(cd_size as u32).to_le_bytes());
        buf.extend_from_slice(&(cd_start as u32).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // comment len

        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&buf).unwrap();
        path
    }

    #[test]
    fn crc_corruption_is_reproducible_across_identical_archives() {
        let dir = tempfile::tempdir().unwrap();
        let a = build_test_zip(dir.path(), "a.zip", "file.txt", b"hello world");
        let b = build_test_zip(dir.path(), "b.zip", "file.txt", b"hello world");

        let corruptor = ArchiveCorruptor::new();
        let plan_a = CorruptionPlan::new(&a, CorruptionType::Crc).with_seed(99999);
        let plan_b = CorruptionPlan::new(&b, CorruptionType::Crc).with_seed(99999);
        let result_a = corruptor.apply(&plan_a).unwrap();
        let result_b = corruptor.apply(&plan_b).unwrap();

        assert_eq!(result_a.new_bytes, result_b.new_bytes);
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());

        let detection = corruptor.detect(&a).unwrap();
        assert!(detection.types.contains(&CorruptionType::Crc));
    }

    #[test]
    fn apply_then_restore_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_test_zip(dir.path(), "a.zip", "file.txt", b"payload");
        let before = fs::read(&path).unwrap();

        let corruptor = ArchiveCorruptor::new();
        let plan = CorruptionPlan::new(&path, CorruptionType::Header);
        corruptor.apply(&plan).unwrap();
        assert_ne!(fs::read(&path).unwrap(), before);

        corruptor.restore(&plan).unwrap();
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn truncate_shrinks_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_test_zip(dir.path(), "a.zip", "file.txt", b"payload-data");
        let before_len = fs::metadata(&path).unwrap().len();

        let corruptor = ArchiveCorruptor::new();
        let plan = CorruptionPlan::new(&path, CorruptionType::Truncate).with_corruption_size(10);
        corruptor.apply(&plan).unwrap();
        let after_len = fs::metadata(&path).unwrap().len();
        assert_eq!(after_len, before_len - 10);
    }

    #[test]
    fn empty_archive_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.zip");
        fs::File::create(&path).unwrap();

        let corruptor = ArchiveCorruptor::new();
        let plan = CorruptionPlan::new(&path, CorruptionType::Crc);
        let result = corruptor.apply(&plan).unwrap();
        assert_eq!(result.recoverable, Some(true));
    }

    #[test]
    fn detection_flags_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_test_zip(dir.path(), "a.zip", "file.txt", b"payload");
        let corruptor = ArchiveCorruptor::new();
        let plan = CorruptionPlan::new(&path, CorruptionType::Truncate).with_corruption_size(1000);
        corruptor.apply(&plan).unwrap();

        let detection = corruptor.detect(&path).unwrap();
        assert!(detection.types.contains(&CorruptionType::Truncate));
    }
}
