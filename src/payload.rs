use anyhow::Context;
use bytes::Bytes;
use rand::RngCore;
use rand::rngs::OsRng;

/// Returns `size` bytes from the operating system's CSPRNG.
///
/// Random content keeps compression anywhere on the path from skewing the
/// transfer numbers. A zero size gives an empty buffer.
pub fn generate(size: usize) -> Result<Bytes, anyhow::Error> {
    if size == 0 {
        return Ok(Bytes::new());
    }
    let mut buf = vec![0u8; size];
    OsRng
        .try_fill_bytes(&mut buf)
        .with_context(|| format!("Failed to generate {} random bytes", size))?;
    Ok(Bytes::from(buf))
}
