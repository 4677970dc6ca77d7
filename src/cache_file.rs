use crate::quant::{quantize::from_parts, DoubleQuant, OutlierEntry, OutlierSet, Transposed};
use crate::state::{CachedWeight, WeightLayout};
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"I8MMCW01"; // int8 matmul cached weight v1
const VERSION: u32 = 1;

pub fn save_cached_weight<P: AsRef<Path>>(path: P, w: &CachedWeight) -> Result<()> {
    // Format (little endian):
    // magic: 8 bytes b"I8MMCW01"
    // u32 version
    // u8  layout (0 = inner-major, 1 = outer-major)
    // u32 rows, u32 cols of the quantized matrix
    // f32 scb[rows], f32 scbt[cols]
    // i8  cb[rows*cols], i8 cbt[cols*rows]
    // u32 outlier count, then (u32 row, u32 col, f32 value) each
    let f = File::create(&path).with_context(|| format!("create cached weight file: {}", path.as_ref().display()))?;
    let mut w_out = BufWriter::new(f);
    let dq = w.double_quant();
    let (rows, cols) = dq.shape();
    w_out.write_all(MAGIC)?;
    w_out.write_all(&VERSION.to_le_bytes())?;
    let layout = match w.layout() { WeightLayout::InnerMajor => 0u8, WeightLayout::OuterMajor => 1u8 };
    w_out.write_all(&[layout])?;
    w_out.write_all(&(rows as u32).to_le_bytes())?;
    w_out.write_all(&(cols as u32).to_le_bytes())?;
    for s in dq.scb().iter().chain(dq.scbt()) { w_out.write_all(&s.to_le_bytes())?; }
    let codes: Vec<u8> = dq.cb().iter().chain(dq.cbt()).map(|&q| q as u8).collect();
    w_out.write_all(&codes)?;
    let entries = dq.outliers().entries();
    w_out.write_all(&(entries.len() as u32).to_le_bytes())?;
    for e in entries {
        w_out.write_all(&(e.row as u32).to_le_bytes())?;
        w_out.write_all(&(e.col as u32).to_le_bytes())?;
        w_out.write_all(&e.value.to_le_bytes())?;
    }
    w_out.flush().context("flush cached weight file")?;
    Ok(())
}

// magic, version, layout, rows, cols
const HEADER_BYTES: u64 = 8 + 4 + 1 + 4 + 4;
// u32 row, u32 col, f32 value
const OUTLIER_BYTES: u64 = 12;

/// File length up to and including the outlier count, or `None` on overflow.
fn body_len(rows: usize, cols: usize) -> Option<u64> {
    let (rows, cols) = (rows as u64, cols as u64);
    let scales = rows.checked_add(cols)?.checked_mul(4)?;
    let codes = rows.checked_mul(cols)?.checked_mul(2)?;
    HEADER_BYTES.checked_add(scales)?.checked_add(codes)?.checked_add(4)
}

fn read_u32(r: &mut impl Read, what: &str) -> Result<u32> {
    let mut b4 = [0u8; 4];
    r.read_exact(&mut b4).with_context(|| format!("read {}", what))?;
    Ok(u32::from_le_bytes(b4))
}

fn read_f32s(r: &mut impl Read, n: usize, what: &str) -> Result<Vec<f32>> {
    let mut buf = vec![0u8; n * 4];
    r.read_exact(&mut buf).with_context(|| format!("read {} ({} f32s)", what, n))?;
    Ok(buf.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

fn read_i8s(r: &mut impl Read, n: usize, what: &str) -> Result<Vec<i8>> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf).with_context(|| format!("read {} ({} codes)", what, n))?;
    Ok(buf.into_iter().map(|b| b as i8).collect())
}

/// Load a weight written by [`save_cached_weight`]. Unlike weight loaders that
/// pad short files, a truncated cache is an error.
pub fn load_cached_weight<P: AsRef<Path>>(path: P) -> Result<CachedWeight> {
    let f = File::open(&path).with_context(|| format!("open cached weight file: {}", path.as_ref().display()))?;
    let file_len = f.metadata().context("stat cached weight file")?.len();
    let mut r = BufReader::new(f);
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic).context("read magic")?;
    if &magic != MAGIC { bail!("bad cached weight magic"); }
    let version = read_u32(&mut r, "version")?;
    if version != VERSION { bail!("unsupported cached weight version {}", version); }
    let mut b1 = [0u8; 1];
    r.read_exact(&mut b1).context("read layout")?;
    let layout = match b1[0] {
        0 => WeightLayout::InnerMajor,
        1 => WeightLayout::OuterMajor,
        other => bail!("unknown weight layout tag {}", other),
    };
    let rows = read_u32(&mut r, "rows")? as usize;
    let cols = read_u32(&mut r, "cols")? as usize;
    // header sizes are checked against the file before anything is allocated
    let fixed = body_len(rows, cols).context("cached weight dimensions overflow")?;
    if fixed > file_len { bail!("cached weight file too short: {}x{} needs {} bytes, file has {}", rows, cols, fixed, file_len); }
    let scb = read_f32s(&mut r, rows, "scb")?;
    let scbt = read_f32s(&mut r, cols, "scbt")?;
    let cb = read_i8s(&mut r, rows * cols, "cb")?;
    let cbt = read_i8s(&mut r, rows * cols, "cbt")?;
    let count = read_u32(&mut r, "outlier count")?;
    let expected = (count as u64).checked_mul(OUTLIER_BYTES).and_then(|n| n.checked_add(fixed));
    if expected != Some(file_len) {
        bail!("cached weight file is {} bytes, header with {} outliers implies {:?}", file_len, count, expected);
    }
    let mut entries = Vec::new();
    for _ in 0..count {
        let row = read_u32(&mut r, "outlier row")? as usize;
        let col = read_u32(&mut r, "outlier col")? as usize;
        let value = f32::from_bits(read_u32(&mut r, "outlier value")?);
        if row >= rows || col >= cols { bail!("outlier ({}, {}) outside {}x{}", row, col, rows, cols); }
        // outliers were zeroed before quantizing; a live code would count the value twice
        if cb[row * cols + col] != 0 { bail!("outlier ({}, {}) overlaps a nonzero int8 code", row, col); }
        entries.push(OutlierEntry { row, col, value });
    }
    let transposed = Some(Transposed { data: cbt, col_scale: scbt });
    let quant = from_parts(rows, cols, cb, scb, transposed).context("validate cached weight")?;
    let outliers = OutlierSet::from_entries(rows, cols, Vec::new(), entries);
    log::debug!("loaded cached weight {}x{} from {}", rows, cols, path.as_ref().display());
    Ok(CachedWeight::new(DoubleQuant::from_parts(quant, outliers), layout))
}
