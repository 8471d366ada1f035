//! Mapped file access for a ringfile database.
//!
//! The whole file is memory-mapped on open; reads and writes are
//! positioned copies against the map, so an update's partial progress
//! is durable at page granularity and a final asynchronous flush is all
//! the close path needs. Writers take a whole-file advisory lock;
//! readers map the file shared and never lock.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use log::debug;
use memmap2::{Advice, Mmap, MmapMut, MmapOptions, UncheckedAdvice};

use crate::error::{Error, ErrorKind, Result};
use crate::format::{Rrd, VALUE_SIZE};

/// How long before an archive's next row write its active page is kept
/// resident by [`RrdFile::dontneed`].
const HOT_WINDOW_SECS: u64 = 10 * 60;

#[derive(Debug)]
enum Map {
    Ro(Mmap),
    Rw(MmapMut),
}

/// An open database file: the descriptor plus its mapping.
#[derive(Debug)]
pub struct RrdFile {
    file: File,
    map: Map,
    len: usize,
}

fn io_err(kind: ErrorKind, err: io::Error) -> Error {
    Error::with_detail(kind, err.to_string())
}

fn page_size() -> usize {
    // sysconf cannot fail for _SC_PAGESIZE on any supported target
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn page_start(off: usize, page: usize) -> usize {
    off & !(page - 1)
}

impl RrdFile {
    /// Open read-only. `readahead` asks the kernel to populate the map
    /// eagerly; the default access pattern hint is random, which suits
    /// the fetch path.
    pub fn open(path: &Path, readahead: bool) -> Result<Self> {
        let file = File::open(path).map_err(|e| io_err(ErrorKind::OpenFile, e))?;
        let len = file
            .metadata()
            .map_err(|e| io_err(ErrorKind::StatFile, e))?
            .len() as usize;
        let map = unsafe { MmapOptions::new().map(&file) }.map_err(|e| io_err(ErrorKind::Mmap, e))?;
        if readahead {
            let _ = map.advise(Advice::WillNeed);
        } else {
            let _ = map.advise(Advice::Random);
        }
        Ok(RrdFile {
            file,
            map: Map::Ro(map),
            len,
        })
    }

    /// Open an existing file for update.
    pub fn open_rw(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| io_err(ErrorKind::OpenFile, e))?;
        let len = file
            .metadata()
            .map_err(|e| io_err(ErrorKind::StatFile, e))?
            .len() as usize;
        let map =
            unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| io_err(ErrorKind::Mmap, e))?;
        let _ = map.advise(Advice::Random);
        Ok(RrdFile {
            file,
            map: Map::Rw(map),
            len,
        })
    }

    /// Create a file of exactly `size` bytes and map it writable. With
    /// `exclusive` an existing file is an error, otherwise it is
    /// truncated and rebuilt.
    pub fn create(path: &Path, size: u64, exclusive: bool) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true);
        if exclusive {
            opts.create_new(true);
        } else {
            opts.create(true).truncate(true);
        }
        let file = opts.open(path).map_err(|e| io_err(ErrorKind::OpenFile, e))?;

        // allocate the exact size up front so a full filesystem cannot
        // turn later mapped writes into a bus error
        let rc = unsafe {
            libc::posix_fallocate(file.as_raw_fd(), 0, size as libc::off_t)
        };
        if rc != 0 {
            // fallback: poke the last byte
            file.set_len(size)
                .map_err(|e| io_err(ErrorKind::Allocate, e))?;
        }

        let map =
            unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| io_err(ErrorKind::Mmap, e))?;
        Ok(RrdFile {
            file,
            map: Map::Rw(map),
            len: size as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        match &self.map {
            Map::Ro(m) => &m[..],
            Map::Rw(m) => &m[..],
        }
    }

    /// Take the whole-file exclusive advisory lock, non-blocking. The
    /// lock dies with the descriptor on close.
    pub fn lock(&self) -> Result<()> {
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = libc::F_WRLCK as libc::c_short;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = 0;
        fl.l_len = 0;
        let rc = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_SETLK, &fl) };
        if rc != 0 {
            return Err(io_err(ErrorKind::Lock, io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn read_exact_at(&self, off: u64, out: &mut [u8]) -> Result<()> {
        let off = off as usize;
        let end = off.checked_add(out.len()).ok_or(ErrorKind::Seek)?;
        if end > self.len {
            return Err(Error::new(ErrorKind::ShortRead));
        }
        out.copy_from_slice(&self.data()[off..end]);
        Ok(())
    }

    pub fn write_all_at(&mut self, off: u64, data: &[u8]) -> Result<()> {
        let off = off as usize;
        let end = off.checked_add(data.len()).ok_or(ErrorKind::Seek)?;
        if end > self.len {
            return Err(Error::new(ErrorKind::WriteBeyondEof));
        }
        match &mut self.map {
            Map::Ro(_) => Err(Error::with_detail(
                ErrorKind::Write,
                "file is mapped read-only",
            )),
            Map::Rw(m) => {
                m[off..end].copy_from_slice(data);
                Ok(())
            }
        }
    }

    pub fn read_values(&self, off: u64, cnt: usize) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(cnt);
        let mut buf = [0u8; VALUE_SIZE];
        for i in 0..cnt {
            self.read_exact_at(off + (i * VALUE_SIZE) as u64, &mut buf)?;
            out.push(f64::from_bits(u64::from_ne_bytes(buf)));
        }
        Ok(out)
    }

    pub fn write_values(&mut self, off: u64, values: &[f64]) -> Result<()> {
        for (i, v) in values.iter().enumerate() {
            self.write_all_at(off + (i * VALUE_SIZE) as u64, &v.to_bits().to_ne_bytes())?;
        }
        Ok(())
    }

    /// Schedule dirty pages for write-out without waiting for them.
    pub fn flush_async(&self) -> Result<()> {
        if let Map::Rw(m) = &self.map {
            m.flush_async()
                .map_err(|e| io_err(ErrorKind::Sync, e))?;
        }
        Ok(())
    }

    /// Drop the page cache for everything except the header and each
    /// archive's active row page. An archive whose next boundary falls
    /// within ten minutes keeps its following page resident too.
    pub fn dontneed(&self, rrd: &Rrd) {
        let page = page_size();
        let header_len = rrd.header_size() as usize;
        let ds_cnt = rrd.stat_head.ds_cnt as usize;

        let mut rra_start = header_len;
        let mut dontneed_start = page_start(rra_start, page) + page;
        for (idx, def) in rrd.rra_def.iter().enumerate() {
            let active_block = page_start(
                rra_start + rrd.rra_ptr[idx].cur_row as usize * ds_cnt * VALUE_SIZE,
                page,
            );
            if active_block > dontneed_start {
                self.advise_dontneed(dontneed_start, active_block - dontneed_start - 1);
            }
            dontneed_start = active_block;
            let cadence = rrd.stat_head.pdp_step * def.pdp_cnt;
            if cadence - (rrd.live_head.last_up as u64) % cadence < HOT_WINDOW_SECS {
                dontneed_start += page;
            }
            rra_start += def.row_cnt as usize * ds_cnt * VALUE_SIZE;
        }
        if dontneed_start < self.len {
            self.advise_dontneed(dontneed_start, self.len - dontneed_start);
        }
    }

    fn advise_dontneed(&self, off: usize, len: usize) {
        if len == 0 || off + len > self.len {
            return;
        }
        let res = unsafe {
            match &self.map {
                Map::Ro(m) => m.unchecked_advise_range(UncheckedAdvice::DontNeed, off, len),
                Map::Rw(m) => m.unchecked_advise_range(UncheckedAdvice::DontNeed, off, len),
            }
        };
        if let Err(err) = res {
            debug!("[file] madvise(DONTNEED) failed: {err}");
        }
        // on linux only fadvise reliably drops clean pages from cache
        unsafe {
            libc::posix_fadvise(
                self.file.as_raw_fd(),
                off as libc::off_t,
                len as libc::off_t,
                libc::POSIX_FADV_DONTNEED,
            );
        }
    }

    /// Flush asynchronously and close. Dropping the handle unmaps and
    /// closes without the flush.
    pub fn close(self) -> Result<()> {
        self.flush_async()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sizes_the_file_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact.rrd");
        let f = RrdFile::create(&path, 4096, false).unwrap();
        assert_eq!(f.len(), 4096);
        drop(f);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn create_exclusive_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.rrd");
        RrdFile::create(&path, 1024, false).unwrap().close().unwrap();
        let err = RrdFile::create(&path, 1024, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OpenFile);
    }

    #[test]
    fn positioned_io_round_trips_and_bounds_are_hard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io.rrd");
        let mut f = RrdFile::create(&path, 64, false).unwrap();

        f.write_values(8, &[1.5, f64::NAN]).unwrap();
        let back = f.read_values(8, 2).unwrap();
        assert_eq!(back[0], 1.5);
        assert!(back[1].is_nan());

        assert_eq!(
            f.write_all_at(60, &[0u8; 8]).unwrap_err().kind(),
            ErrorKind::WriteBeyondEof
        );
        let mut buf = [0u8; 8];
        assert_eq!(
            f.read_exact_at(60, &mut buf).unwrap_err().kind(),
            ErrorKind::ShortRead
        );
        f.close().unwrap();

        // read-only maps refuse writes
        let mut ro = RrdFile::open(&path, false).unwrap();
        assert_eq!(
            ro.write_all_at(0, &[0u8; 8]).unwrap_err().kind(),
            ErrorKind::Write
        );
    }

    #[test]
    fn lock_is_exclusive_per_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.rrd");
        let f = RrdFile::create(&path, 128, false).unwrap();
        f.lock().unwrap();
        // same-process relock through another descriptor succeeds under
        // POSIX record locks; exclusion is tested across processes in
        // the CLI suite
        let g = RrdFile::open_rw(&path).unwrap();
        g.lock().unwrap();
    }
}
