//! In-memory modules for unit tests.
//!
//! [`ModuleBuilder`] describes a module: its assembly references, types, methods with optional
//! bodies and `MemberRef` rows. [`FixtureProvider`] hands out [`FixtureModule`]s built from
//! registered builders and records how it was used, so tests can check which files were
//! opened for write and which were saved.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::{
    assembly::{CilBody, Instruction},
    metadata::{tables::TableId, token::Token},
    patcher::{
        MethodDefinition, MethodReference, ModuleEditor, ModuleProvider, ModuleView,
        TypeDefinition, TypeSig,
    },
    Error, Result,
};

/// `REPOLib.Objects.PrefabRef`
pub fn prefab_ref() -> TypeSig {
    TypeSig::class("REPOLib.Objects", "PrefabRef")
}

/// `void REPOLib.Modules.Valuables::RegisterValuable(UnityEngine.GameObject)`
pub fn deprecated_valuable() -> MethodReference {
    MethodReference {
        declaring_type: TypeSig::class("REPOLib.Modules", "Valuables"),
        name: "RegisterValuable".to_string(),
        has_this: false,
        explicit_this: false,
        calling_convention: 0,
        generic_param_count: 0,
        return_type: TypeSig::void(),
        parameters: vec![TypeSig::class("UnityEngine", "GameObject")],
    }
}

/// A library defining both the old and the new `RegisterValuable(GameObject)`.
pub fn reference_library() -> ModuleBuilder {
    let mut builder = ModuleBuilder::new("REPOLib");
    let old = deprecated_valuable();
    builder.method(
        "REPOLib.Modules",
        "Valuables",
        "RegisterValuable",
        old.return_type,
        old.parameters.clone(),
    );
    builder.method(
        "REPOLib.Modules",
        "Valuables",
        "RegisterValuable",
        prefab_ref(),
        old.parameters,
    );
    builder
}

/// A method row of a fixture module.
#[derive(Debug, Clone)]
pub struct FixtureMethod {
    pub reference: MethodReference,
    pub body: Option<CilBody>,
}

/// Description of an in-memory module.
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    pub assembly_name: String,
    pub module_name: String,
    pub references: Vec<String>,
    pub types: Vec<(String, String, Vec<Token>)>,
    pub methods: Vec<FixtureMethod>,
    pub member_refs: Vec<MethodReference>,
}

impl ModuleBuilder {
    pub fn new(assembly_name: &str) -> Self {
        ModuleBuilder {
            assembly_name: assembly_name.to_string(),
            module_name: format!("{assembly_name}.dll"),
            references: Vec::new(),
            types: Vec::new(),
            methods: Vec::new(),
            member_refs: Vec::new(),
        }
    }

    pub fn with_reference(mut self, assembly: &str) -> Self {
        self.references.push(assembly.to_string());
        self
    }

    fn add_method(&mut self, namespace: &str, type_name: &str, method: FixtureMethod) -> Token {
        let token = Token::from_parts(TableId::MethodDef, self.methods.len() as u32 + 1);
        self.methods.push(method);

        match self
            .types
            .iter_mut()
            .find(|(ns, name, _)| ns == namespace && name == type_name)
        {
            Some((_, _, methods)) => methods.push(token),
            None => self
                .types
                .push((namespace.to_string(), type_name.to_string(), vec![token])),
        }
        token
    }

    /// Defines a static method without a body.
    pub fn method(
        &mut self,
        namespace: &str,
        type_name: &str,
        name: &str,
        return_type: TypeSig,
        parameters: Vec<TypeSig>,
    ) -> Token {
        let reference = MethodReference {
            declaring_type: TypeSig::class(namespace, type_name),
            name: name.to_string(),
            has_this: false,
            explicit_this: false,
            calling_convention: 0,
            generic_param_count: 0,
            return_type,
            parameters,
        };
        self.add_method(
            namespace,
            type_name,
            FixtureMethod {
                reference,
                body: None,
            },
        )
    }

    /// Defines a static `void()` method with the given code and `max_stack` 8.
    pub fn method_with_body(
        &mut self,
        namespace: &str,
        type_name: &str,
        name: &str,
        instructions: Vec<Instruction>,
    ) -> Token {
        let token = self.method(namespace, type_name, name, TypeSig::void(), Vec::new());
        self.methods[token.row() as usize - 1].body = Some(CilBody {
            max_stack: 8,
            init_locals: false,
            local_var_sig_token: 0,
            instructions,
            handlers: Vec::new(),
        });
        token
    }

    /// Adds a `MemberRef` row.
    pub fn member_ref(&mut self, reference: MethodReference) -> Token {
        self.member_refs.push(reference);
        Token::from_parts(TableId::MemberRef, self.member_refs.len() as u32)
    }
}

#[derive(Default)]
struct Store {
    modules: RefCell<HashMap<PathBuf, ModuleBuilder>>,
    read_opens: Cell<usize>,
    write_opens: Cell<usize>,
    saves: RefCell<Vec<PathBuf>>,
}

/// Opens registered [`ModuleBuilder`]s as modules.
#[derive(Default)]
pub struct FixtureProvider {
    store: Rc<Store>,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl AsRef<Path>, module: ModuleBuilder) {
        self.store
            .modules
            .borrow_mut()
            .insert(path.as_ref().to_path_buf(), module);
    }

    /// The current state of the module at `path`, including saved changes.
    pub fn module(&self, path: &Path) -> Option<ModuleBuilder> {
        self.store.modules.borrow().get(path).cloned()
    }

    pub fn read_opens(&self) -> usize {
        self.store.read_opens.get()
    }

    pub fn write_opens(&self) -> usize {
        self.store.write_opens.get()
    }

    pub fn saves(&self) -> Vec<PathBuf> {
        self.store.saves.borrow().clone()
    }

    fn open(&self, path: &Path, writable: bool) -> Result<FixtureModule> {
        let Some(data) = self.module(path) else {
            return Err(malformed_error!("No fixture module at {}", path.display()));
        };

        Ok(FixtureModule {
            data,
            path: path.to_path_buf(),
            writable,
            modified: false,
            store: Some(self.store.clone()),
        })
    }
}

impl ModuleProvider for FixtureProvider {
    type Module = FixtureModule;

    fn exists(&self, path: &Path) -> bool {
        self.store.modules.borrow().contains_key(path)
    }

    fn open_read(&self, path: &Path) -> Result<FixtureModule> {
        self.store.read_opens.set(self.store.read_opens.get() + 1);
        self.open(path, false)
    }

    fn open_write(&self, path: &Path) -> Result<FixtureModule> {
        self.store.write_opens.set(self.store.write_opens.get() + 1);
        self.open(path, true)
    }
}

/// A module backed by a [`ModuleBuilder`].
pub struct FixtureModule {
    pub data: ModuleBuilder,
    path: PathBuf,
    writable: bool,
    modified: bool,
    store: Option<Rc<Store>>,
}

impl FixtureModule {
    /// A writable module that is not backed by a provider; saving it does nothing.
    pub fn detached(data: ModuleBuilder) -> Self {
        FixtureModule {
            data,
            path: PathBuf::new(),
            writable: true,
            modified: false,
            store: None,
        }
    }

    fn method(&self, token: Token) -> Result<&FixtureMethod> {
        if token.table_id() != Some(TableId::MethodDef) {
            return Err(Error::TokenNotFound(token));
        }
        self.data
            .methods
            .get((token.row() as usize).wrapping_sub(1))
            .ok_or(Error::TokenNotFound(token))
    }
}

impl ModuleView for FixtureModule {
    fn assembly_name(&self) -> Option<&str> {
        Some(&self.data.assembly_name)
    }

    fn module_name(&self) -> &str {
        &self.data.module_name
    }

    fn references_assembly(&self, name: &str) -> bool {
        self.data.references.iter().any(|reference| reference == name)
    }

    fn types(&self) -> Result<Vec<TypeDefinition>> {
        Ok(self
            .data
            .types
            .iter()
            .enumerate()
            .map(|(index, (namespace, name, methods))| TypeDefinition {
                token: Token::from_parts(TableId::TypeDef, index as u32 + 1),
                full_name: TypeSig::class(namespace, name).full_name(),
                methods: methods
                    .iter()
                    .map(|token| {
                        let method = &self.data.methods[token.row() as usize - 1];
                        MethodDefinition {
                            token: *token,
                            name: method.reference.name.clone(),
                            has_body: method.body.is_some(),
                        }
                    })
                    .collect(),
            })
            .collect())
    }

    fn resolve_method(&self, token: Token) -> Result<Option<MethodReference>> {
        match token.table_id() {
            Some(TableId::MethodDef) => Ok(Some(self.method(token)?.reference.clone())),
            Some(TableId::MemberRef) => self
                .data
                .member_refs
                .get((token.row() as usize).wrapping_sub(1))
                .cloned()
                .map(Some)
                .ok_or(Error::TokenNotFound(token)),
            Some(TableId::MethodSpec) => Ok(None),
            _ => Err(Error::TokenNotFound(token)),
        }
    }
}

impl ModuleEditor for FixtureModule {
    fn method_body(&self, method: Token) -> Result<Option<CilBody>> {
        Ok(self.method(method)?.body.clone())
    }

    fn set_method_body(&mut self, method: Token, body: CilBody) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        self.method(method)?;
        self.data.methods[method.row() as usize - 1].body = Some(body);
        self.modified = true;
        Ok(())
    }

    fn import_method(&mut self, method: &MethodReference) -> Result<Token> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        if let Some(index) = self.data.member_refs.iter().position(|existing| existing == method) {
            return Ok(Token::from_parts(TableId::MemberRef, index as u32 + 1));
        }
        self.modified = true;
        Ok(self.data.member_ref(method.clone()))
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn save(&mut self) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        if let Some(store) = &self.store {
            store
                .modules
                .borrow_mut()
                .insert(self.path.clone(), self.data.clone());
            store.saves.borrow_mut().push(self.path.clone());
        }
        self.modified = false;
        Ok(())
    }
}
