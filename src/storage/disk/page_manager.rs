use crate::storage::page::PageId;
use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 8192;

/// Flat page-granularity file access. Allocation hands out dense page ids
/// and reuses deallocated ones before growing the file.
pub struct PageManager {
    file: File,
    next_page_id: u32,
    free_pages: Vec<PageId>,
}

impl PageManager {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;

        Ok(Self {
            file,
            next_page_id: 0,
            free_pages: Vec::new(),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open file: {:?}", path))?;

        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            next_page_id: (file_size / PAGE_SIZE as u64) as u32,
            free_pages: Vec::new(),
        })
    }

    /// Allocate a page id, extending the file so the page is always readable.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        if let Some(page_id) = self.free_pages.pop() {
            return Ok(page_id);
        }

        let page_id = PageId(self.next_page_id);
        self.next_page_id += 1;

        let new_size = Self::page_offset(page_id) + PAGE_SIZE as u64;
        self.file
            .set_len(new_size)
            .context("Failed to extend file")?;

        Ok(page_id)
    }

    /// Return a page id to the free pool for reuse.
    pub fn deallocate_page(&mut self, page_id: PageId) {
        self.free_pages.push(page_id);
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            bail!(
                "Buffer size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                buf.len()
            );
        }

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset >= file_size {
            bail!("Page {} does not exist", page_id.0);
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file.read_exact(buf).context("Failed to read page")?;

        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            bail!(
                "Data size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                data.len()
            );
        }

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset >= file_size {
            let new_size = offset + PAGE_SIZE as u64;
            self.file
                .set_len(new_size)
                .context("Failed to extend file")?;
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file.write_all(data).context("Failed to write page")?;
        self.file.sync_all().context("Failed to sync")?;

        Ok(())
    }

    pub fn num_pages(&self) -> u32 {
        self.next_page_id
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_allocate_and_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("test.db"))?;

        let p0 = pm.allocate_page()?;
        let p1 = pm.allocate_page()?;
        assert_eq!(p0, PageId(0));
        assert_eq!(p1, PageId(1));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xab;
        data[PAGE_SIZE - 1] = 0xcd;
        pm.write_page(p1, &data)?;

        let mut buf = [0u8; PAGE_SIZE];
        pm.read_page(p1, &mut buf)?;
        assert_eq!(buf[0], 0xab);
        assert_eq!(buf[PAGE_SIZE - 1], 0xcd);

        Ok(())
    }

    #[test]
    fn test_freshly_allocated_page_is_readable() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("test.db"))?;

        let page_id = pm.allocate_page()?;
        let mut buf = [0u8; PAGE_SIZE];
        pm.read_page(page_id, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_deallocate_reuses_page_id() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("test.db"))?;

        let p0 = pm.allocate_page()?;
        let p1 = pm.allocate_page()?;
        pm.deallocate_page(p0);

        assert_eq!(pm.allocate_page()?, p0);
        assert_eq!(pm.allocate_page()?, PageId(p1.0 + 1));

        Ok(())
    }

    #[test]
    fn test_read_nonexistent_page_fails() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("test.db"))?;

        let mut buf = [0u8; PAGE_SIZE];
        assert!(pm.read_page(PageId(42), &mut buf).is_err());

        Ok(())
    }
}
