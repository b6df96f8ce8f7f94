use crate::config::DriverConfig;
use crate::driver::Driver;
use plugsql_core::{PlugsqlError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Named drivers owned by the application.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config: DriverConfig) -> Result<Arc<Driver>> {
        if self.drivers.contains_key(&config.name) {
            return Err(PlugsqlError::Config(format!(
                "driver {:?} is already registered",
                config.name
            )));
        }
        let driver = Arc::new(Driver::new(config)?);
        info!(plugin = %driver.name(), "driver registered");
        self.drivers
            .insert(driver.name().to_string(), Arc::clone(&driver));
        Ok(driver)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Driver>> {
        self.drivers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops every plugin process. Keeps going past failures and returns the
    /// first one.
    pub async fn close_all(&self) -> Result<()> {
        let mut first_err = None;
        for name in self.names() {
            let Some(driver) = self.drivers.get(&name) else {
                continue;
            };
            if let Err(err) = driver.close().await {
                warn!(plugin = %name, "failed to close driver: {err}");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
