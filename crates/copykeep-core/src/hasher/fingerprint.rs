use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use twox_hash::XxHash64;

/// Bytes sampled from each end of a file for the quick fingerprint.
pub const SAMPLE_LENGTH: u64 = 1024 * 1024;
const READ_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    pub quick_sig: String,
    pub full_hash: String,
}

/// Compute both fingerprints for a file, in parallel.
pub fn fingerprint(path: &Path) -> io::Result<Fingerprints> {
    let (quick, full) = rayon::join(|| quick_sig(path), || full_hash(path));
    Ok(Fingerprints {
        quick_sig: quick?,
        full_hash: full?,
    })
}

/// `"{size}:{xxh64 of first sample}:{xxh64 of last sample}"`, hex encoded.
///
/// Files no larger than one sample reuse the head sample as the tail.
pub fn quick_sig(path: &Path) -> io::Result<String> {
    let mut f = File::open(path)?;
    let size = f.metadata()?.len();

    let head = read_sample(&mut f, 0, size.min(SAMPLE_LENGTH))?;
    let head_hash = hash_data(&head);
    let tail_hash = if size <= SAMPLE_LENGTH {
        head_hash
    } else {
        let tail = read_sample(&mut f, size - SAMPLE_LENGTH, SAMPLE_LENGTH)?;
        hash_data(&tail)
    };
    Ok(format!("{}:{:016x}:{:016x}", size, head_hash, tail_hash))
}

/// BLAKE3 hex digest of the whole file, streamed.
pub fn full_hash(path: &Path) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let n = f.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn read_sample(f: &mut File, offset: u64, length: u64) -> io::Result<Vec<u8>> {
    f.seek(SeekFrom::Start(offset))?;
    let mut buffer = Vec::with_capacity(length as usize);
    f.take(length).read_to_end(&mut buffer)?;
    Ok(buffer)
}

pub fn hash_data(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprints_are_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mkv");
        fs::write(&path, b"some video bytes").unwrap();

        let first = fingerprint(&path).unwrap();
        let second = fingerprint(&path).unwrap();
        assert_eq!(first, second);
        assert!(first.quick_sig.starts_with("16:"));
        assert_eq!(first.full_hash, blake3::hash(b"some video bytes").to_hex().to_string());
    }

    #[test]
    fn test_small_file_reuses_head_sample() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.bin");
        fs::write(&path, b"abc").unwrap();

        let sig = quick_sig(&path).unwrap();
        let parts: Vec<&str> = sig.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], parts[2]);
    }

    #[test]
    fn test_large_file_samples_tail() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let mut data = vec![7u8; (SAMPLE_LENGTH as usize) * 2 + 10];
        fs::write(&a, &data).unwrap();
        let last = data.len() - 1;
        data[last] = 8;
        fs::write(&b, &data).unwrap();

        let sig_a = quick_sig(&a).unwrap();
        let sig_b = quick_sig(&b).unwrap();
        assert_ne!(sig_a, sig_b);
        assert_eq!(sig_a.split(':').nth(1), sig_b.split(':').nth(1));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        assert!(fingerprint(&dir.path().join("gone.mkv")).is_err());
    }
}
