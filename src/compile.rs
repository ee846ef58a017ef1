// Purpose: Compile an Appfile by resolving imports, walking dependencies, and persisting the result.
// Inputs/Outputs: Consumes a parsed root File; produces a Compiled value and the on-disk artifact.
// Invariants: Artifact writes happen only after every resolution and validation step succeeds.
// Gotchas: Cached import files are shared; always merge a copy, never the cached value itself.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use tracing::debug;

use crate::appfile::{self, File};
use crate::error::CompileError;
use crate::fetch;
use crate::fetch::storage::{FolderStorage, Storage};
use crate::graph::Dag;

/// Version of the compilation format. Lets a future layout change be
/// detected when loading an artifact produced by a newer tool.
pub const COMPILE_VERSION: u64 = 1;

pub const COMPILE_FILENAME: &str = "Appfile.compiled";
pub const COMPILE_DEPS_FOLDER: &str = "deps";
pub const COMPILE_VERSION_FILENAME: &str = "version";

/// Called once per non-root vertex after its Appfile (if any) was parsed
/// and import-resolved. May transform the file or synthesize one when no
/// manifest was on disk.
pub type Loader = Arc<dyn Fn(Option<File>, &Path) -> anyhow::Result<File> + Send + Sync>;

/// Receives notifications while compilation runs. Invoked from whichever
/// task observed the event, so implementations must be thread-safe.
pub type Callback = Arc<dyn Fn(&CompileEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileEvent {
    /// A dependency is about to be fetched.
    Dep { source: String },
    /// An import is about to be fetched.
    Import { source: String },
}

/// A fully resolved Appfile: the root file plus the dependency graph, both
/// verified. Compiling needs the network once; a compiled value can later
/// be reloaded from disk without it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Compiled {
    pub file: File,
    pub graph: Dag<CompiledGraphVertex>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompiledGraphVertex {
    pub file: File,
    /// Data directory for this dependency; empty for the root vertex.
    pub dir: PathBuf,
    name: String,
}

impl CompiledGraphVertex {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Compiled {
    /// Runs the structural checks across the assembled graph: no cycles,
    /// and every file passes schema validation. Validation failures are
    /// collected across all vertices rather than stopping at the first.
    pub fn validate(&self) -> Result<(), CompileError> {
        let mut errors = Vec::new();

        for cycle in self.graph.cycles() {
            errors.push(CompileError::Cycle {
                vertices: cycle
                    .iter()
                    .map(|&ix| self.graph.node(ix).name().to_string())
                    .collect(),
            });
        }

        let collected = Mutex::new(Vec::new());
        thread::scope(|s| {
            for vertex in self.graph.nodes() {
                let collected = &collected;
                s.spawn(move || {
                    if let Err(err) = vertex.file.validate() {
                        let dependency = if vertex.file.source.is_empty() {
                            None
                        } else {
                            Some(vertex.file.source.clone())
                        };
                        collected
                            .lock()
                            .unwrap()
                            .push(CompileError::Validation { dependency, err });
                    }
                });
            }
        });
        errors.extend(collected.into_inner().unwrap());

        CompileError::aggregate(errors)
    }
}

impl fmt::Display for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compiled Appfile: {}", self.file.path.display())?;
        writeln!(f)?;
        writeln!(f, "Dep graph:")?;
        for vertex in self.graph.nodes() {
            if vertex.file.source.is_empty() {
                writeln!(f, "  {} (root)", vertex.name())?;
            } else {
                writeln!(f, "  {} ({})", vertex.name(), vertex.file.source)?;
            }
        }
        for &(from, to) in self.graph.edges() {
            writeln!(
                f,
                "  {} -> {}",
                self.graph.node(from).name(),
                self.graph.node(to).name()
            )?;
        }
        Ok(())
    }
}

/// Options for [`Compiler::new`].
#[derive(Default)]
pub struct CompileOpts {
    /// Directory where all compiled data is stored. Must be kept around
    /// for the compiled Appfile to be reloaded later.
    pub dir: PathBuf,
    pub loader: Option<Loader>,
    pub callback: Option<Callback>,
}

/// Compiles Appfiles. Downloaded import data is cached per instance, so
/// repeated compilations with one compiler avoid refetching.
pub struct Compiler {
    opts: CompileOpts,
    dep_storage: FolderStorage,
    import_storage: FolderStorage,
    import_cache: Mutex<ImportCache>,
    import_cond: Condvar,
}

/// Shared state for concurrent import downloads. `in_flight` keys are
/// being downloaded right now; requesters for those keys block on the
/// condvar until the download lands in `files`.
#[derive(Default)]
struct ImportCache {
    files: HashMap<String, File>,
    in_flight: HashSet<String>,
}

/// Tracks import edges during one resolution to catch circular imports
/// early. The outermost file is the synthetic "root" vertex.
#[derive(Default)]
struct ImportGraph {
    graph: Dag<String>,
    indices: HashMap<String, usize>,
}

impl ImportGraph {
    fn new() -> Self {
        let mut tracker = Self::default();
        tracker.ensure("root");
        tracker
    }

    fn ensure(&mut self, name: &str) -> usize {
        match self.indices.get(name) {
            Some(&ix) => ix,
            None => {
                let ix = self.graph.add(name.to_string());
                self.indices.insert(name.to_string(), ix);
                ix
            }
        }
    }

    /// Adds `parent -> child` and returns the cycles that exist afterward,
    /// as ordered vertex name lists.
    fn connect(&mut self, parent: &str, child: &str) -> Vec<Vec<String>> {
        let p = self.ensure(parent);
        let c = self.ensure(child);
        self.graph.connect(p, c);
        self.graph
            .cycles()
            .into_iter()
            .map(|cycle| {
                cycle
                    .into_iter()
                    .map(|ix| self.graph.node(ix).clone())
                    .collect()
            })
            .collect()
    }
}

impl Compiler {
    pub fn new(opts: CompileOpts) -> Result<Self, CompileError> {
        fs::create_dir_all(&opts.dir)
            .map_err(|err| CompileError::io(format!("create {}", opts.dir.display()), err))?;

        let storage_dir = opts.dir.join(COMPILE_DEPS_FOLDER);
        Ok(Self {
            dep_storage: FolderStorage::new(storage_dir.clone()),
            import_storage: FolderStorage::new(storage_dir),
            import_cache: Mutex::new(ImportCache::default()),
            import_cond: Condvar::new(),
            opts,
        })
    }

    /// Compiles an Appfile into the configured directory.
    ///
    /// This needs network connectivity when there are imports or non-local
    /// dependencies. [`load_compiled`] reloads the result later without it.
    pub fn compile(&self, file: File) -> Result<Compiled, CompileError> {
        write_version(&self.opts.dir)?;

        let mut file = file;
        if !file.path.as_os_str().is_empty() {
            let has_id = file
                .has_id()
                .map_err(|err| CompileError::io("checking for Appfile id", err))?;
            if !has_id {
                file.init_id()
                    .map_err(|err| CompileError::io("writing id for this Appfile", err))?;
            }
            file.load_id()
                .map_err(|err| CompileError::io("loading Appfile id", err))?;
        }

        let mut compiled = self.min_compile(file)?;

        compiled
            .file
            .validate()
            .map_err(|err| CompileError::Validation {
                dependency: None,
                err,
            })?;

        self.compile_dependencies(&mut compiled)?;

        compiled.validate()?;

        write_compiled(&self.opts.dir, &compiled)?;

        Ok(compiled)
    }

    /// Resolves imports on the single given file and returns it as a
    /// one-vertex graph. No dependencies are fetched; this is the shallow
    /// form for callers that need a valid compiled value without network
    /// access to dependencies.
    pub fn min_compile(&self, mut file: File) -> Result<Compiled, CompileError> {
        self.compile_imports(&mut file)?;

        let name = file
            .application
            .as_ref()
            .map(|app| app.name.clone())
            .unwrap_or_default();
        let mut graph = Dag::new();
        graph.add(CompiledGraphVertex {
            file: file.clone(),
            dir: PathBuf::new(),
            name,
        });

        Ok(Compiled { file, graph })
    }

    fn compile_dependencies(&self, compiled: &mut Compiled) -> Result<(), CompileError> {
        let graph = &mut compiled.graph;
        let root_ix = 0;

        let root_dir = graph.node(root_ix).file.dir();
        let self_key = fetch::detect(".", &root_dir).map_err(|err| CompileError::Resolve {
            source_str: ".".to_string(),
            reason: err.to_string(),
        })?;

        let root_infrastructure = graph.node(root_ix).file.infrastructure.clone();
        let root_project = graph.node(root_ix).file.project.clone();

        let mut vertex_map: HashMap<String, usize> = HashMap::new();
        vertex_map.insert(self_key, root_ix);

        let mut queue = vec![root_ix];
        while let Some(current) = queue.pop() {
            debug!(vertex = graph.node(current).name(), "compiling dependencies");

            let base = graph.node(current).file.dir();
            let deps = graph
                .node(current)
                .file
                .application
                .as_ref()
                .map(|app| app.dependencies.clone())
                .unwrap_or_default();

            for dep in deps {
                let key =
                    fetch::detect(&dep.source, &base).map_err(|err| CompileError::Resolve {
                        source_str: dep.source.clone(),
                        reason: err.to_string(),
                    })?;

                let vertex_ix = match vertex_map.get(&key) {
                    Some(&ix) => ix,
                    None => {
                        debug!(key = %key, "loading dependency");
                        if let Some(callback) = &self.opts.callback {
                            callback(&CompileEvent::Dep { source: key.clone() });
                        }

                        self.dep_storage
                            .get(&key, &key, true)
                            .map_err(|err| CompileError::Fetch {
                                key: key.clone(),
                                err,
                            })?;
                        let (dir, _) =
                            self.dep_storage
                                .dir(&key)
                                .map_err(|err| CompileError::Fetch {
                                    key: key.clone(),
                                    err,
                                })?;

                        let appfile_path = dir.join("Appfile");
                        let mut file = if appfile_path.exists() {
                            let mut parsed =
                                appfile::parse_file(&appfile_path).map_err(|err| {
                                    CompileError::Parse {
                                        path: appfile_path.clone(),
                                        err,
                                    }
                                })?;
                            self.compile_imports(&mut parsed)?;
                            Some(parsed)
                        } else {
                            None
                        };

                        if let Some(loader) = &self.opts.loader {
                            file =
                                Some(loader(file, &dir).map_err(|err| CompileError::Loader {
                                    key: key.clone(),
                                    err,
                                })?);
                        }

                        let Some(mut file) = file else {
                            return Err(CompileError::Loader {
                                key: key.clone(),
                                err: anyhow::anyhow!("no Appfile found in {}", dir.display()),
                            });
                        };

                        file.source = key.clone();

                        match appfile::load_id_from(&dir) {
                            Ok(Some(id)) => file.id = id,
                            Ok(None) => {
                                return Err(CompileError::Identity { key: key.clone() });
                            }
                            Err(err) => {
                                return Err(CompileError::io(
                                    format!("checking for id file in {key}"),
                                    err,
                                ));
                            }
                        }

                        // The root infrastructure choice is pushed down to
                        // every dependency. A dependency without a project
                        // of its own joins the root's.
                        file.infrastructure = root_infrastructure.clone();
                        if let Some(root_project) = &root_project {
                            let project =
                                file.project.get_or_insert_with(|| appfile::Project {
                                    name: root_project.name.clone(),
                                    infrastructure: String::new(),
                                });
                            project.infrastructure = root_project.infrastructure.clone();
                        }

                        let name = file
                            .application
                            .as_ref()
                            .map(|app| app.name.clone())
                            .unwrap_or_default();
                        let ix = graph.add(CompiledGraphVertex { file, dir, name });
                        vertex_map.insert(key.clone(), ix);
                        queue.push(ix);
                        ix
                    }
                };

                graph.connect(current, vertex_ix);
            }
        }

        Ok(())
    }

    /// Loads every import of `root`, in parallel, and merges them into it
    /// in declaration order. Failures accumulate; nothing is merged unless
    /// every import resolved.
    fn compile_imports(&self, root: &mut File) -> Result<(), CompileError> {
        if root.imports.is_empty() {
            return Ok(());
        }

        let graph = Mutex::new(ImportGraph::new());
        let errors = Mutex::new(Vec::new());

        self.import_single("root", root, &graph, &errors);

        CompileError::aggregate(errors.into_inner().unwrap())
    }

    /// Resolves and merges the imports of one file. Returns true on
    /// success; on failure the errors have already been recorded.
    fn import_single(
        &self,
        parent: &str,
        file: &mut File,
        graph: &Mutex<ImportGraph>,
        errors: &Mutex<Vec<CompileError>>,
    ) -> bool {
        let base = file.dir();
        let slots: Mutex<Vec<Option<File>>> = Mutex::new(vec![None; file.imports.len()]);

        let ok = thread::scope(|s| {
            for (idx, import) in file.imports.iter().enumerate() {
                let key = match fetch::detect(&import.source, &base) {
                    Ok(key) => key,
                    Err(err) => {
                        errors.lock().unwrap().push(CompileError::Resolve {
                            source_str: import.source.clone(),
                            reason: err.to_string(),
                        });
                        return false;
                    }
                };

                let cycles = graph.lock().unwrap().connect(parent, &key);
                if !cycles.is_empty() {
                    let mut errs = errors.lock().unwrap();
                    for vertices in cycles {
                        errs.push(CompileError::Cycle { vertices });
                    }
                    return false;
                }

                let slots = &slots;
                s.spawn(move || {
                    if let Some(fetched) = self.download_import(&key, graph, errors) {
                        slots.lock().unwrap()[idx] = Some(fetched);
                    }
                });
            }
            true
        });
        if !ok {
            return false;
        }

        // An empty slot means that download failed and recorded its error.
        let mut merge = Vec::with_capacity(file.imports.len());
        for slot in slots.into_inner().unwrap() {
            match slot {
                Some(fetched) => merge.push(fetched),
                None => return false,
            }
        }

        for mut imported in merge {
            // The id carried the source key from the download; imports do
            // not propagate identity, so both id and path are cleared
            // before the merge.
            let source = std::mem::take(&mut imported.id);
            imported.path = PathBuf::new();

            if let Err(reason) = file.merge(&imported) {
                errors
                    .lock()
                    .unwrap()
                    .push(CompileError::Merge { key: source, reason });
                return false;
            }
        }

        true
    }

    /// Fetches and recursively resolves a single import, deduplicating
    /// through the per-compiler cache. Concurrent requests for the same
    /// key wait for the first download instead of refetching.
    fn download_import(
        &self,
        key: &str,
        graph: &Mutex<ImportGraph>,
        errors: &Mutex<Vec<CompileError>>,
    ) -> Option<File> {
        let mut state = self.import_cache.lock().unwrap();
        loop {
            if let Some(cached) = state.files.get(key) {
                debug!(key, "cache hit on import");
                // Merging mutates, so hand out a copy of the cached value.
                return Some(cached.clone());
            }
            if !state.in_flight.contains(key) {
                state.in_flight.insert(key.to_string());
                break;
            }
            state = self.import_cond.wait(state).unwrap();
        }
        drop(state);

        let fetched = self.fetch_import(key, graph, errors);

        let mut state = self.import_cache.lock().unwrap();
        state.in_flight.remove(key);
        if let Some(file) = &fetched {
            state.files.insert(key.to_string(), file.clone());
        }
        drop(state);
        self.import_cond.notify_all();

        fetched
    }

    fn fetch_import(
        &self,
        key: &str,
        graph: &Mutex<ImportGraph>,
        errors: &Mutex<Vec<CompileError>>,
    ) -> Option<File> {
        debug!(key, "loading import");
        if let Some(callback) = &self.opts.callback {
            callback(&CompileEvent::Import {
                source: key.to_string(),
            });
        }

        if let Err(err) = self.import_storage.get(key, key, true) {
            errors.lock().unwrap().push(CompileError::Fetch {
                key: key.to_string(),
                err,
            });
            return None;
        }
        let dir = match self.import_storage.dir(key) {
            Ok((dir, _)) => dir,
            Err(err) => {
                errors.lock().unwrap().push(CompileError::Fetch {
                    key: key.to_string(),
                    err,
                });
                return None;
            }
        };

        let appfile_path = dir.join("Appfile");
        let mut file = match appfile::parse_file(&appfile_path) {
            Ok(file) => file,
            Err(err) => {
                errors.lock().unwrap().push(CompileError::Parse {
                    path: appfile_path,
                    err,
                });
                return None;
            }
        };

        // Carry the source key in the id until the merge consumes it.
        file.id = key.to_string();

        if !self.import_single(key, &mut file, graph, errors) {
            return None;
        }

        Some(file)
    }
}

/// Loads and verifies a previously compiled Appfile from `dir`.
pub fn load_compiled(dir: &Path) -> Result<Compiled, CompileError> {
    let version_path = dir.join(COMPILE_VERSION_FILENAME);
    let text = fs::read_to_string(&version_path)
        .map_err(|err| CompileError::io(format!("read {}", version_path.display()), err))?;
    let line = text.lines().next().unwrap_or("").trim();
    let version: u64 = line.parse().map_err(|_| {
        CompileError::io(
            format!("read {}", version_path.display()),
            anyhow::anyhow!("invalid version {line:?}"),
        )
    })?;

    if version > COMPILE_VERSION {
        return Err(CompileError::Version { found: version });
    }

    let path = dir.join(COMPILE_FILENAME);
    let text = fs::read_to_string(&path)
        .map_err(|err| CompileError::io(format!("read {}", path.display()), err))?;
    let compiled = serde_json::from_str(&text)
        .map_err(|err| CompileError::io(format!("decode {}", path.display()), err))?;
    Ok(compiled)
}

fn write_version(dir: &Path) -> Result<(), CompileError> {
    let path = dir.join(COMPILE_VERSION_FILENAME);
    fs::write(&path, COMPILE_VERSION.to_string())
        .map_err(|err| CompileError::io(format!("write {}", path.display()), err))
}

fn write_compiled(dir: &Path, compiled: &Compiled) -> Result<(), CompileError> {
    // Pretty-printed so the artifact stays inspectable by hand.
    let data = serde_json::to_string_pretty(compiled)
        .map_err(|err| CompileError::io("encode compiled Appfile", err))?;
    let path = dir.join(COMPILE_FILENAME);
    fs::write(&path, data)
        .map_err(|err| CompileError::io(format!("write {}", path.display()), err))
}
