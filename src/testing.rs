//! Test doubles for the network and the external tools.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::config::ToolCommand;
use crate::model::{BinaryRecord, PackageRecord, SymbolTable};
use crate::store::MemoryStore;
use crate::traits::{DedupStore, FetchError, HttpClient, HttpResponse, StoreError};

/// In-memory web: unknown URLs answer 404, failing URLs raise a transport error.
#[derive(Default)]
pub struct MockHttp {
    pages: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    failing: Mutex<HashSet<String>>,
    requests: Mutex<Vec<String>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.into()));
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_matching(&self, needle: &str) -> usize {
        self.requests().iter().filter(|url| url.contains(needle)).count()
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        if self.failing.lock().unwrap().contains(url) {
            return Err(FetchError::Request {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let (status, body) = self
            .pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or((404, b"not found".to_vec()));
        // Small chunks so tags and lines straddle chunk boundaries.
        let chunks: Vec<Result<Bytes, FetchError>> = body
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(HttpResponse {
            status,
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// [`MemoryStore`] whose operations can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    package_lookups_fail: AtomicBool,
    package_saves_fail: AtomicBool,
    failing_binary: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_package_lookups(&self) {
        self.package_lookups_fail.store(true, Ordering::SeqCst);
    }

    pub fn fail_package_saves(&self) {
        self.package_saves_fail.store(true, Ordering::SeqCst);
    }

    /// Saving any binary whose name contains `needle` fails.
    pub fn fail_binaries_containing(&self, needle: &str) {
        *self.failing_binary.lock().unwrap() = Some(needle.to_string());
    }

    fn outage() -> StoreError {
        StoreError::Database("connection lost".to_string())
    }
}

#[async_trait]
impl DedupStore for FlakyStore {
    async fn find_package(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<PackageRecord>, StoreError> {
        if self.package_lookups_fail.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.find_package(name, path).await
    }

    async fn save_package(&self, name: &str, path: &str) -> Result<(), StoreError> {
        if self.package_saves_fail.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.save_package(name, path).await
    }

    async fn find_binary(&self, name: &str) -> Result<Option<BinaryRecord>, StoreError> {
        self.inner.find_binary(name).await
    }

    async fn save_binary(&self, name: &str, symbols: &SymbolTable) -> Result<(), StoreError> {
        let failing = self.failing_binary.lock().unwrap().clone();
        if failing.is_some_and(|needle| name.contains(&needle)) {
            return Err(Self::outage());
        }
        self.inner.save_binary(name, symbols).await
    }
}

/// File the fake tools append their name to on every invocation.
pub struct ToolLog {
    path: PathBuf,
}

impl ToolLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("tools.log"),
        }
    }

    pub fn count(&self, tool: &str) -> usize {
        std::fs::read_to_string(&self.path)
            .map(|log| log.lines().filter(|line| *line == tool).count())
            .unwrap_or(0)
    }
}

fn script(dir: &Path, name: &str, body: &str) -> ToolCommand {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    ToolCommand::new("sh").with_args([path.display().to_string()])
}

/// `dpkg -x` stand-in: the archive bytes become two libraries plus a symlink.
pub fn fake_dpkg(dir: &Path, log: &ToolLog) -> ToolCommand {
    script(
        dir,
        "fake-dpkg.sh",
        &format!(
            "echo dpkg >> '{log}'\n\
             [ \"$1\" = \"-x\" ] || exit 2\n\
             mkdir -p \"$3/lib32\" \"$3/usr/lib32\"\n\
             cp \"$2\" \"$3/lib32/libc-2.19.so\"\n\
             cp \"$2\" \"$3/usr/lib32/libfoo.so.1\"\n\
             ln -s libc-2.19.so \"$3/lib32/libc.so.6\"\n",
            log = log.path.display()
        ),
    )
}

/// `nm -D` stand-in: prints the file, which holds `nm` output already.
pub fn fake_nm(dir: &Path, log: &ToolLog) -> ToolCommand {
    script(
        dir,
        "fake-nm.sh",
        &format!(
            "echo nm >> '{log}'\n[ \"$1\" = \"-D\" ] || exit 2\ncat \"$2\"\n",
            log = log.path.display()
        ),
    )
}
