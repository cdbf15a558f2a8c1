//! The code-loading graph.
//!
//! An immutable chain of loader links. Each link has a classpath of loadable
//! files and native search directories, and delegates to the links before it
//! (parent-first). A graph value is never mutated: adding a library appends a
//! link to a copy, anything that drops code builds a new graph from scratch.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::libraries::library::ExternalLibrary;

/// One loader in the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderLink {
    /// Loadable files, in load order
    pub classpath: Vec<PathBuf>,
    /// Directories searched for native code
    pub native_search_dirs: Vec<PathBuf>,
    /// Libraries this link covers
    pub libraries: Vec<String>,
    /// Classes this link defines
    pub class_names: BTreeSet<String>,
}

impl LoaderLink {
    /// A link covering `libraries`, in order.
    pub fn for_libraries<'a>(libraries: impl IntoIterator<Item = &'a ExternalLibrary>) -> Self {
        let mut link = LoaderLink::default();
        for lib in libraries {
            link.classpath.extend(lib.loadable_files().iter().cloned());
            link.native_search_dirs
                .extend(lib.native_search_dirs().iter().cloned());
            link.libraries.push(lib.name().to_string());
            link.class_names.extend(lib.class_names().iter().cloned());
        }
        link
    }

    pub fn defines(&self, class_name: &str) -> bool {
        self.class_names.contains(class_name)
    }
}

/// A versioned chain of loader links.
#[derive(Debug, Clone, Default)]
pub struct LoaderGraph {
    generation: u64,
    links: Vec<Arc<LoaderLink>>,
}

impl LoaderGraph {
    /// A graph with no links.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A fresh graph with one link covering every library.
    pub fn rebuilt<'a>(
        generation: u64,
        libraries: impl IntoIterator<Item = &'a ExternalLibrary>,
    ) -> Self {
        let link = LoaderLink::for_libraries(libraries);
        let links = if link.libraries.is_empty() {
            Vec::new()
        } else {
            vec![Arc::new(link)]
        };
        LoaderGraph { generation, links }
    }

    /// A copy of this graph with `link` appended.
    pub fn extended(&self, link: LoaderLink) -> Self {
        let mut links = self.links.clone();
        links.push(Arc::new(link));
        LoaderGraph {
            generation: self.generation + 1,
            links,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn links(&self) -> &[Arc<LoaderLink>] {
        &self.links
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The link that resolves `class_name`, parents first.
    pub fn locate(&self, class_name: &str) -> Option<&LoaderLink> {
        self.links
            .iter()
            .map(Arc::as_ref)
            .find(|link| link.defines(class_name))
    }

    /// Every loadable file, parents first.
    pub fn classpath(&self) -> Vec<PathBuf> {
        self.links
            .iter()
            .flat_map(|l| l.classpath.iter().cloned())
            .collect()
    }

    /// Every native search directory, parents first.
    pub fn native_search_dirs(&self) -> Vec<PathBuf> {
        self.links
            .iter()
            .flat_map(|l| l.native_search_dirs.iter().cloned())
            .collect()
    }

    /// The classpath as a platform search-path string.
    pub fn classpath_string(&self) -> OsString {
        join_lossy(&self.classpath())
    }

    /// The native search path as a platform search-path string.
    pub fn native_search_path(&self) -> OsString {
        join_lossy(&self.native_search_dirs())
    }
}

fn join_lossy(paths: &[PathBuf]) -> OsString {
    std::env::join_paths(paths).unwrap_or_else(|_| {
        // An entry contains the separator; fall back to one entry per line.
        let mut out = OsString::new();
        for (i, p) in paths.iter().enumerate() {
            if i > 0 {
                out.push("\n");
            }
            out.push(Path::new(p));
        }
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(lib: &str, classes: &[&str]) -> LoaderLink {
        LoaderLink {
            classpath: vec![PathBuf::from(format!("/ext/{lib}/classes.dex"))],
            native_search_dirs: Vec::new(),
            libraries: vec![lib.to_string()],
            class_names: classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_extend_keeps_parent_links() {
        let base = LoaderGraph::empty().extended(link("foo.jar", &["com.x.Foo"]));
        let next = base.extended(link("bar.jar", &["com.x.Bar"]));

        assert_eq!(base.links().len(), 1);
        assert_eq!(next.links().len(), 2);
        assert!(Arc::ptr_eq(&base.links()[0], &next.links()[0]));
        assert_eq!(next.generation(), base.generation() + 1);
    }

    #[test]
    fn test_locate_is_parent_first() {
        let graph = LoaderGraph::empty()
            .extended(link("foo.jar", &["com.x.Foo"]))
            .extended(link("shadow.jar", &["com.x.Foo", "com.x.Extra"]));

        assert_eq!(graph.locate("com.x.Foo").unwrap().libraries, vec!["foo.jar"]);
        assert_eq!(
            graph.locate("com.x.Extra").unwrap().libraries,
            vec!["shadow.jar"]
        );
        assert!(graph.locate("com.x.Missing").is_none());
    }

    #[test]
    fn test_classpath_order() {
        let graph = LoaderGraph::empty()
            .extended(link("a.jar", &[]))
            .extended(link("b.jar", &[]));
        assert_eq!(
            graph.classpath(),
            vec![
                PathBuf::from("/ext/a.jar/classes.dex"),
                PathBuf::from("/ext/b.jar/classes.dex")
            ]
        );
        assert!(!graph.classpath_string().is_empty());
        assert!(graph.native_search_path().is_empty());
    }

    #[test]
    fn test_rebuilt_without_libraries_is_empty() {
        let graph = LoaderGraph::rebuilt(7, std::iter::empty());
        assert!(graph.is_empty());
        assert_eq!(graph.generation(), 7);
    }
}
