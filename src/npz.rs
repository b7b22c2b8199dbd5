//! NPY / NPZ reading and writing for speaker-embedding vectors.
//!
//! Two archives pass through here:
//!   - the CMU ARCTIC x-vector archive (`spkrec-xvect.zip`), one `(512,)`
//!     vector per utterance, read member-by-member so only the rows we need
//!     are inflated;
//!   - the local embedding cache, written by [`save_npz`] as one `(512,)`
//!     `<f4` array per voice id.
//!
//! Supported NPY subset: format 1.0 / 2.0, C order, `float32` or `float64`
//! (the latter narrowed to `f32` on load).

use anyhow::{bail, Context, Result};
use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek, Write},
    path::Path,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

// ─────────────────────────────────────────────────────────────────────────────
// NPY decode
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Dtype {
    F32,
    F64,
}

/// Parse a raw `.npy` buffer into its shape and flat row-major `f32` data.
pub fn parse_npy(data: &[u8]) -> Result<(Vec<usize>, Vec<f32>)> {
    if data.len() < 10 || &data[..6] != NPY_MAGIC {
        bail!("Not a valid NPY file (bad magic)");
    }

    let (header_len, header_start) = match data[6] {
        1 => (u16::from_le_bytes([data[8], data[9]]) as usize, 10),
        2 | 3 => {
            if data.len() < 12 {
                bail!("NPY v{} file too short", data[6]);
            }
            (u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize, 12)
        }
        major => bail!("Unsupported NPY version {}.{}", major, data[7]),
    };

    let header_end = header_start + header_len;
    if data.len() < header_end {
        bail!("NPY file truncated in header");
    }
    let header = std::str::from_utf8(&data[header_start..header_end])
        .context("NPY header is not valid UTF-8")?;

    let descr = header_field(header, "descr").context("NPY header missing 'descr'")?;
    let big_endian = descr.starts_with('>');
    let dtype = match descr.trim_start_matches(['<', '>', '=', '|']) {
        "f4" => Dtype::F32,
        "f8" => Dtype::F64,
        other => bail!("Unsupported dtype '{}': only float32/float64 are supported", other),
    };

    let fortran = header_field(header, "fortran_order").unwrap_or("False");
    if fortran.eq_ignore_ascii_case("true") {
        bail!("Fortran-order arrays are not supported");
    }

    let shape = parse_shape(header_field(header, "shape").context("NPY header missing 'shape'")?)?;
    let n_elements: usize = shape.iter().product();

    let width = match dtype {
        Dtype::F32 => 4,
        Dtype::F64 => 8,
    };
    let body = &data[header_end..];
    if body.len() < n_elements * width {
        bail!(
            "NPY data section too short: expected {} bytes, got {}",
            n_elements * width,
            body.len()
        );
    }

    let values = body[..n_elements * width]
        .chunks_exact(width)
        .map(|b| match dtype {
            Dtype::F32 => {
                let arr = [b[0], b[1], b[2], b[3]];
                if big_endian { f32::from_be_bytes(arr) } else { f32::from_le_bytes(arr) }
            }
            Dtype::F64 => {
                let arr = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
                let v = if big_endian { f64::from_be_bytes(arr) } else { f64::from_le_bytes(arr) };
                v as f32
            }
        })
        .collect();

    Ok((shape, values))
}

/// Value of `field` in a Python-literal dict header, without quotes.
///
/// `header_field("{'descr': '<f4', 'shape': (3,)}", "descr")` → `Some("<f4")`.
fn header_field<'a>(header: &'a str, field: &str) -> Option<&'a str> {
    let key_sq = format!("'{}':", field);
    let key_dq = format!("\"{}\":", field);

    let start = header
        .find(key_sq.as_str())
        .map(|p| p + key_sq.len())
        .or_else(|| header.find(key_dq.as_str()).map(|p| p + key_dq.len()))?;
    let rest = header[start..].trim_start();

    match rest.chars().next()? {
        '(' => rest.find(')').map(|end| &rest[..=end]),
        quote @ ('\'' | '"') => {
            let inner = &rest[1..];
            inner.find(quote).map(|end| &inner[..end])
        }
        _ => {
            let end = rest.find([',', '}']).unwrap_or(rest.len());
            Some(rest[..end].trim())
        }
    }
}

/// Parse a Python shape tuple: `(256, 512, )`, `(512,)` or `()`.
fn parse_shape(s: &str) -> Result<Vec<usize>> {
    s.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>().with_context(|| format!("Bad shape dim: '{}'", t)))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// NPY encode
// ─────────────────────────────────────────────────────────────────────────────

/// Serialise `values` as an NPY v1.0 little-endian `float32` array of `shape`.
///
/// The header is space-padded so that magic + length + header is a multiple
/// of 64 bytes, as NumPy itself writes it.
pub fn encode_npy(shape: &[usize], values: &[f32]) -> Vec<u8> {
    let dims = match shape {
        [single] => format!("{},", single),
        _ => shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", "),
    };
    let mut header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({}), }}", dims);
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    header.extend(std::iter::repeat(' ').take((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut buf = Vec::with_capacity(10 + header.len() + values.len() * 4);
    buf.extend_from_slice(NPY_MAGIC);
    buf.extend_from_slice(&[1, 0]);
    buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
    buf.extend_from_slice(header.as_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

// ─────────────────────────────────────────────────────────────────────────────
// NPZ archives
// ─────────────────────────────────────────────────────────────────────────────

/// A loaded NPY array: shape plus flat `f32` data in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NpyArray {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Data as a single vector, accepting `(n,)`, `(1, n)` and `(n, 1)` shapes.
    pub fn as_vector(&self) -> Option<&[f32]> {
        let non_unit = self.shape.iter().filter(|&&d| d != 1).count();
        (non_unit <= 1).then_some(self.data.as_slice())
    }
}

/// Random-access reader over the `.npy` members of a ZIP archive.
pub struct NpzArchive<R: Read + Seek> {
    archive: ZipArchive<R>,
}

impl NpzArchive<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Cannot open NPZ file: {}", path.display()))?;
        Self::new(file).with_context(|| format!("Cannot open ZIP archive: {}", path.display()))
    }
}

impl<R: Read + Seek> NpzArchive<R> {
    pub fn new(reader: R) -> Result<Self> {
        Ok(Self { archive: ZipArchive::new(reader).context("Not a ZIP archive")? })
    }

    /// Names of every `.npy` member, sorted lexicographically.
    pub fn member_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .archive
            .file_names()
            .filter(|n| n.ends_with(".npy"))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Inflate and parse a single member by its full archive name.
    pub fn read(&mut self, member: &str) -> Result<NpyArray> {
        let mut entry = self
            .archive
            .by_name(member)
            .with_context(|| format!("NPZ member '{}' not found", member))?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf).context("Failed to read NPY entry")?;
        let (shape, data) =
            parse_npy(&buf).with_context(|| format!("Failed to parse NPY entry '{}'", member))?;
        Ok(NpyArray { shape, data })
    }
}

/// Load every array in an NPZ file, keyed by member name minus `.npy`.
pub fn load_npz(path: &Path) -> Result<HashMap<String, NpyArray>> {
    let mut npz = NpzArchive::open(path)?;
    let mut arrays = HashMap::new();
    for member in npz.member_names() {
        let array = npz.read(&member)?;
        arrays.insert(member.trim_end_matches(".npy").to_string(), array);
    }
    Ok(arrays)
}

/// Write 1-D arrays to an NPZ file at `path`, replacing it atomically.
///
/// The archive is built in a temporary file beside `path` and renamed into
/// place, so concurrent writers never leave a torn file behind; the last
/// rename wins.
pub fn save_npz(path: &Path, arrays: &[(String, Vec<f32>)]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create cache directory: {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Cannot create temp file in {}", dir.display()))?;
    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, values) in arrays {
            zip.start_file(format!("{}.npy", name), options)
                .with_context(|| format!("Cannot start NPZ member '{}'", name))?;
            zip.write_all(&encode_npy(&[values.len()], values))
                .context("Failed to write NPY entry")?;
        }
        zip.finish().context("Failed to finalise NPZ archive")?;
    }
    tmp.as_file().sync_all().context("Failed to flush NPZ archive")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Cannot move NPZ into place: {}", path.display()))?;
    Ok(())
}
