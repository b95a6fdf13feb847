use crate::error::{ErrorKind, Result};
use crate::makeself::Makeself;
use crate::package::{ArchiveRequest, BuiltArchive, BuiltPackage, PackageBuilder};
use crate::workspace::WorkspaceSources;
use async_trait::async_trait;
use exn::ResultExt;
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

type Outcome = std::result::Result<BuiltArchive, ErrorKind>;

/// A set of archive definitions over one workspace.
///
/// A package reference that names another archive builds that archive
/// first; anything else is a pre-built path in the workspace. Every archive
/// is built at most once per project, and a failed build is not retried.
pub struct Project {
    makeself: Arc<Makeself>,
    sources: WorkspaceSources,
    archives: BTreeMap<String, ArchiveRequest>,
    built: Mutex<HashMap<String, Arc<Mutex<Option<Outcome>>>>>,
}
impl Project {
    /// Fails on duplicate names and on archives that (indirectly) package
    /// themselves.
    pub fn new(
        makeself: Arc<Makeself>,
        sources: WorkspaceSources,
        archives: impl IntoIterator<Item = ArchiveRequest>,
    ) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for archive in archives {
            let name = archive.name().to_string();
            if by_name.insert(name.clone(), archive).is_some() {
                exn::bail!(ErrorKind::InvalidRequest(format!("archive {name} is defined twice")));
            }
        }
        check_cycles(&by_name)?;
        Ok(Self { makeself, sources, archives: by_name, built: Mutex::new(HashMap::new()) })
    }

    pub fn archives(&self) -> impl Iterator<Item = &ArchiveRequest> {
        self.archives.values()
    }

    pub fn sources(&self) -> &WorkspaceSources {
        &self.sources
    }

    pub async fn build_archive(&self, name: &str) -> Result<BuiltArchive> {
        let Some(req) = self.archives.get(name) else {
            exn::bail!(ErrorKind::UnknownArchive(name.to_string()));
        };
        // Held across the build so concurrent callers wait for one outcome.
        let slot = Arc::clone(self.built.lock().await.entry(name.to_string()).or_default());
        let mut outcome = slot.lock().await;
        if let Some(outcome) = outcome.as_ref() {
            return outcome.clone().map_err(exn::Exn::new);
        }
        let result = self.makeself.package(req, &self.sources, self).await;
        *outcome = Some(match &result {
            Ok(built) => Ok(built.clone()),
            Err(err) => Err(ErrorKind::clone(err)),
        });
        result
    }

    /// Builds the named archives concurrently, or every archive when `names`
    /// is empty.
    pub async fn build_all(&self, names: &[String]) -> Result<Vec<BuiltArchive>> {
        let names: Vec<&str> = match names {
            [] => self.archives.keys().map(String::as_str).collect(),
            names => names.iter().map(String::as_str).collect(),
        };
        try_join_all(names.into_iter().map(|name| self.build_archive(name))).await
    }
}

#[async_trait]
impl PackageBuilder for Project {
    async fn build(&self, reference: &str) -> Result<BuiltPackage> {
        if !self.archives.contains_key(reference) {
            return self.sources.build(reference).await;
        }
        let built = self.build_archive(reference).await.or_raise(|| ErrorKind::Package(reference.to_string()))?;
        Ok(BuiltPackage {
            digest: built.digest,
            artifacts: built.artifacts.into_iter().map(|artifact| artifact.relpath).collect(),
        })
    }
}

fn check_cycles(archives: &BTreeMap<String, ArchiveRequest>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        archives: &'a BTreeMap<String, ArchiveRequest>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                exn::bail!(ErrorKind::DependencyCycle(cycle));
            },
            None => {},
        }
        let Some(archive) = archives.get(name) else {
            return Ok(());
        };
        marks.insert(name, Mark::Visiting);
        stack.push(name);
        for package in archive.packages() {
            if archives.contains_key(package.as_str()) {
                visit(package, archives, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for name in archives.keys() {
        visit(name, archives, &mut marks, &mut Vec::new())?;
    }
    Ok(())
}
