use std::{collections::BTreeMap, sync::Arc};

use crate::{Error, Module, Result};

/// Modules by id.
#[derive(Default)]
pub struct ModuleRegistry {
	modules: BTreeMap<String, Arc<Module>>,
}
impl ModuleRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, module: Arc<Module>) -> Result<()> {
		let module_id = module.module_id().to_string();

		if self.modules.contains_key(&module_id) {
			return Err(Error::InvalidRequest {
				message: format!("Module {module_id:?} is already registered."),
			});
		}

		self.modules.insert(module_id, module);

		Ok(())
	}

	pub fn get(&self, module_id: &str) -> Option<&Arc<Module>> {
		self.modules.get(module_id)
	}

	pub fn require(&self, module_id: &str) -> Result<&Arc<Module>> {
		self.get(module_id)
			.ok_or_else(|| Error::UnknownModule { module_id: module_id.to_string() })
	}

	pub fn iter(&self) -> impl Iterator<Item = &Arc<Module>> {
		self.modules.values()
	}

	pub fn ids(&self) -> impl Iterator<Item = &str> {
		self.modules.keys().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.modules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.modules.is_empty()
	}
}
