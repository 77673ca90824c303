use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Advisory exclusive lock on the data directory, held for the lifetime of an
/// engine. A second engine opening the same directory must fail fast.
///
/// The lock lives on the file handle: closing the handle (drop or `unlock`)
/// releases it. The lock file itself stays on disk, since deleting it would
/// race a concurrent opener that has already opened the old inode.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Opens (creating if needed) the lock file and acquires the exclusive
    /// lock without blocking. On success the file is stamped with the owning
    /// process id for debugging.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::options().create(true).write(true).open(&path)?;

        sys::lock_exclusive(&file)?;

        let mut lock = Self { file, path };
        lock.stamp_pid()?;
        Ok(lock)
    }

    /// Explicitly releases the lock. Dropping the `FileLock` has the same
    /// effect, since the OS releases the lock with the handle.
    pub fn unlock(self) -> io::Result<()> {
        sys::unlock(&self.file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites the lock file's contents with our pid. Only called once
    /// the lock is held, so the stamp never clobbers another holder's.
    fn stamp_pid(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        writeln!(self.file, "{}", std::process::id())?;
        self.file.flush()
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub fn lock_exclusive(file: &File) -> io::Result<()> {
        flock(file, libc::LOCK_EX | libc::LOCK_NB)
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        flock(file, libc::LOCK_UN)
    }

    fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
        match unsafe { libc::flock(file.as_raw_fd(), operation) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;

    use winapi::um::fileapi::{LockFileEx, UnlockFileEx};
    use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OVERLAPPED};

    pub fn lock_exclusive(file: &File) -> io::Result<()> {
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        let ok = unsafe {
            LockFileEx(
                file.as_raw_handle() as *mut _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            )
        };
        match ok {
            0 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        let ok = unsafe {
            UnlockFileEx(
                file.as_raw_handle() as *mut _,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            )
        };
        match ok {
            0 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::fs::File;
    use std::io;

    // No advisory locking on this platform; exclusivity is not enforced.
    pub fn lock_exclusive(_file: &File) -> io::Result<()> {
        Ok(())
    }

    pub fn unlock(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_writes_pid() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let lock_path = dir.path().join("engine.lock");

        let lock = FileLock::lock(&lock_path).expect("acquire lock");
        assert_eq!(lock.path(), lock_path.as_path());

        let content = std::fs::read_to_string(&lock_path).expect("read lock file");
        assert!(content.contains(&std::process::id().to_string()));

        lock.unlock().expect("release lock");
    }

    #[test]
    fn test_double_lock_fails() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let lock_path = dir.path().join("engine.lock");

        let _lock1 = FileLock::lock(&lock_path).expect("first lock");
        assert!(FileLock::lock(&lock_path).is_err());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let lock_path = dir.path().join("engine.lock");

        {
            let _lock = FileLock::lock(&lock_path).expect("first lock");
        }

        let _lock2 = FileLock::lock(&lock_path).expect("lock after drop");
    }

    #[test]
    fn test_relock_after_unlock() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let lock_path = dir.path().join("engine.lock");

        let lock = FileLock::lock(&lock_path).expect("first lock");
        lock.unlock().expect("release lock");

        let _lock2 = FileLock::lock(&lock_path).expect("lock after unlock");
    }
}
