//! Loading modules and checking them against the JSNI ABI.
//!
//! A [`ValidatedModule`] is compiled once and carries a summary of its
//! imports and exports, so the ABI check never touches Wasmtime types.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use wasmtime::{ExternType, FuncType, Module, ValType};

use crate::config::AbiConfig;
use crate::engine::JsniEngine;
use crate::error::{ModuleError, ModuleResult};

/// A compiled module plus its import/export summary.
#[derive(Clone)]
pub struct ValidatedModule {
    inner: Module,
    metadata: ModuleMetadata,
}

impl ValidatedModule {
    /// The compiled Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Import/export summary.
    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    /// Name from the module's name section.
    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    /// Everything the module exports.
    pub fn exports(&self) -> &[ExportInfo] {
        &self.metadata.exports
    }

    /// Everything the module expects the host to provide.
    pub fn imports(&self) -> &[ImportInfo] {
        &self.metadata.imports
    }

    /// Whether `name` is exported.
    pub fn has_export(&self, name: &str) -> bool {
        self.export(name).is_some()
    }

    /// Find an export by name.
    pub fn export(&self, name: &str) -> Option<&ExportInfo> {
        self.metadata.exports.iter().find(|e| e.name == name)
    }

    /// Whether `module::name` is imported.
    pub fn requires_import(&self, module: &str, name: &str) -> bool {
        self.import(module, name).is_some()
    }

    /// Find an import by module and name.
    pub fn import(&self, module: &str, name: &str) -> Option<&ImportInfo> {
        self.metadata
            .imports
            .iter()
            .find(|i| i.module == module && i.name == name)
    }

    /// Whether the module calls the dispatch entry point.
    pub fn uses_dispatch(&self, abi: &AbiConfig) -> bool {
        self.requires_import(&abi.import_module, &abi.import_name)
    }

    /// Check that the module follows the JSNI calling convention.
    ///
    /// The module must export its memory and both allocators, each
    /// `(i32) -> i64`. If it imports the entry point, the import must be
    /// `(i32, i32, i32) -> i32`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::AbiMismatch`] describing the first violation.
    pub fn check_abi(&self, abi: &AbiConfig) -> ModuleResult<()> {
        match self.export(&abi.memory_export).map(|e| &e.kind) {
            Some(ItemKind::Memory) => {}
            Some(other) => {
                return Err(ModuleError::AbiMismatch(format!(
                    "export '{}' must be a memory, found {other}",
                    abi.memory_export
                )));
            }
            None => {
                return Err(ModuleError::AbiMismatch(format!(
                    "missing memory export '{}'",
                    abi.memory_export
                )));
            }
        }

        for name in [&abi.alloc_export, &abi.alloc_slots_export] {
            let export = self
                .export(name)
                .ok_or_else(|| ModuleError::AbiMismatch(format!("missing allocator export '{name}'")))?;
            expect_function(&export.kind, &Signature::ALLOCATOR, || format!("allocator '{name}'"))?;
        }

        if let Some(import) = self.import(&abi.import_module, &abi.import_name) {
            expect_function(&import.kind, &Signature::ENTRY_POINT, || {
                format!("import '{}::{}'", abi.import_module, abi.import_name)
            })?;
        }

        debug!(name = ?self.name(), "Module satisfies the JSNI ABI");
        Ok(())
    }
}

fn expect_function(
    kind: &ItemKind,
    expected: &Signature<'_>,
    what: impl FnOnce() -> String,
) -> ModuleResult<()> {
    if let ItemKind::Function(sig) = kind {
        if sig.params == expected.params && sig.results == expected.results {
            return Ok(());
        }
    }
    Err(ModuleError::AbiMismatch(format!(
        "{} must be a function {expected}, found {kind}",
        what()
    )))
}

/// A function type to check against.
struct Signature<'a> {
    params: &'a [WasmType],
    results: &'a [WasmType],
}

impl Signature<'static> {
    const ALLOCATOR: Self = Self {
        params: &[WasmType::I32],
        results: &[WasmType::I64],
    };

    const ENTRY_POINT: Self = Self {
        params: &[WasmType::I32, WasmType::I32, WasmType::I32],
        results: &[WasmType::I32],
    };
}

impl std::fmt::Display for Signature<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_signature(f, self.params, self.results)
    }
}

fn write_signature(
    f: &mut std::fmt::Formatter<'_>,
    params: &[WasmType],
    results: &[WasmType],
) -> std::fmt::Result {
    let join = |types: &[WasmType]| {
        types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    write!(f, "({}) -> ({})", join(params), join(results))
}

impl std::fmt::Debug for ValidatedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedModule")
            .field("name", &self.metadata.name)
            .field("exports", &self.metadata.exports.len())
            .field("imports", &self.metadata.imports.len())
            .finish()
    }
}

/// Import/export summary of a module.
#[derive(Debug, Clone, Default)]
pub struct ModuleMetadata {
    /// Name from the name section.
    pub name: Option<String>,
    /// Exports, in declaration order.
    pub exports: Vec<ExportInfo>,
    /// Imports, in declaration order.
    pub imports: Vec<ImportInfo>,
}

/// One export.
#[derive(Debug, Clone)]
pub struct ExportInfo {
    /// Export name.
    pub name: String,
    /// What is exported.
    pub kind: ItemKind,
}

/// One import.
#[derive(Debug, Clone)]
pub struct ImportInfo {
    /// Import module.
    pub module: String,
    /// Import name.
    pub name: String,
    /// What is imported.
    pub kind: ItemKind,
}

/// Shape of an imported or exported item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    /// A function and its type.
    Function(FunctionSignature),
    /// A linear memory.
    Memory,
    /// A global.
    Global,
    /// A table.
    Table,
}

impl From<ExternType> for ItemKind {
    fn from(ty: ExternType) -> Self {
        match ty {
            ExternType::Func(func) => ItemKind::Function(FunctionSignature::from(&func)),
            ExternType::Memory(_) => ItemKind::Memory,
            ExternType::Global(_) => ItemKind::Global,
            ExternType::Table(_) => ItemKind::Table,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Function(sig) => write!(f, "function {sig}"),
            ItemKind::Memory => f.write_str("memory"),
            ItemKind::Global => f.write_str("global"),
            ItemKind::Table => f.write_str("table"),
        }
    }
}

/// Parameter and result types of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    /// Parameter types, in order.
    pub params: Vec<WasmType>,
    /// Result types, in order.
    pub results: Vec<WasmType>,
}

impl From<&FuncType> for FunctionSignature {
    fn from(func: &FuncType) -> Self {
        Self {
            params: func.params().map(|t| WasmType::from(&t)).collect(),
            results: func.results().map(|t| WasmType::from(&t)).collect(),
        }
    }
}

impl std::fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_signature(f, &self.params, &self.results)
    }
}

/// A core value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmType {
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// `v128`
    V128,
    /// Any reference type.
    Ref,
}

impl From<&ValType> for WasmType {
    fn from(ty: &ValType) -> Self {
        match ty {
            ValType::I32 => WasmType::I32,
            ValType::I64 => WasmType::I64,
            ValType::F32 => WasmType::F32,
            ValType::F64 => WasmType::F64,
            ValType::V128 => WasmType::V128,
            ValType::Ref(_) => WasmType::Ref,
        }
    }
}

impl std::fmt::Display for WasmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WasmType::I32 => "i32",
            WasmType::I64 => "i64",
            WasmType::F32 => "f32",
            WasmType::F64 => "f64",
            WasmType::V128 => "v128",
            WasmType::Ref => "ref",
        })
    }
}

/// Compiles modules with a shared engine.
pub struct ModuleLoader {
    engine: Arc<JsniEngine>,
}

impl ModuleLoader {
    /// Create a loader compiling with `engine`.
    pub fn new(engine: Arc<JsniEngine>) -> Self {
        Self { engine }
    }

    /// Compile a binary module.
    ///
    /// # Errors
    ///
    /// Fails if Wasmtime rejects the bytes.
    pub fn load_bytes(&self, bytes: &[u8]) -> ModuleResult<ValidatedModule> {
        debug!(size = bytes.len(), "Compiling module");

        let module = Module::new(self.engine.inner(), bytes)?;
        let metadata = summarize(&module);

        info!(
            name = ?metadata.name,
            exports = metadata.exports.len(),
            imports = metadata.imports.len(),
            "Module compiled"
        );

        Ok(ValidatedModule {
            inner: module,
            metadata,
        })
    }

    /// Read and compile a binary module from disk.
    ///
    /// # Errors
    ///
    /// Fails on IO errors or if the contents do not compile.
    pub fn load_file(&self, path: &Path) -> ModuleResult<ValidatedModule> {
        debug!(path = %path.display(), "Reading module");
        self.load_bytes(&std::fs::read(path)?)
    }

    /// Compile a module written in the text format.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Invalid`] if the text does not parse.
    pub fn load_wat(&self, wat: &str) -> ModuleResult<ValidatedModule> {
        let wasm = wat::parse_str(wat).map_err(|e| ModuleError::Invalid(e.to_string()))?;
        self.load_bytes(&wasm)
    }
}

fn summarize(module: &Module) -> ModuleMetadata {
    ModuleMetadata {
        name: module.name().map(String::from),
        exports: module
            .exports()
            .map(|export| ExportInfo {
                name: export.name().to_string(),
                kind: export.ty().into(),
            })
            .collect(),
        imports: module
            .imports()
            .map(|import| ImportInfo {
                module: import.module().to_string(),
                name: import.name().to_string(),
                kind: import.ty().into(),
            })
            .collect(),
    }
}
