//! Consistency checks run after a configuration is loaded.

use super::types::{CacheTargetData, ExecutorConfig, FamilyAllocation};
use crate::errors::ExecutorError;
use crate::resources::ImageFamily;

impl ExecutorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.handler.workers == 0 {
            return Err(ExecutorError::config_error("handler.workers must be greater than 0"));
        }
        if self.handler.prefetch == 0 {
            return Err(ExecutorError::config_error("handler.prefetch must be greater than 0"));
        }
        if self.handler.queue_capacity == 0 {
            return Err(ExecutorError::config_error("handler.queue_capacity must be greater than 0"));
        }

        if self.pool.build_concurrency == 0 {
            return Err(ExecutorError::config_error("pool.build_concurrency must be greater than 0"));
        }
        if self.pool.request_channel_capacity == 0 {
            return Err(ExecutorError::config_error(
                "pool.request_channel_capacity must be greater than 0",
            ));
        }
        if self.pool.tracking_period_secs == 0 || self.pool.polling_interval_secs == 0 {
            return Err(ExecutorError::config_error("pool intervals must be greater than 0"));
        }

        if self.cluster.oversubscription < 1.0 {
            return Err(ExecutorError::config_error("cluster.oversubscription cannot be below 1.0"));
        }
        if self.cluster.total_vcpus <= 0.0 || self.cluster.total_memory_mb == 0 {
            return Err(ExecutorError::config_error("cluster capacity must be greater than 0"));
        }

        if self.limits.max_source_bytes == 0 {
            return Err(ExecutorError::config_error("limits.max_source_bytes must be greater than 0"));
        }

        if self.pool.build_script.is_some() != self.vm.launch_script.is_some() {
            return Err(ExecutorError::config_error(
                "pool.build_script and vm.launch_script must be set together",
            ));
        }
        if self.guest.max_reply_bytes == 0 {
            return Err(ExecutorError::config_error("guest.max_reply_bytes must be greater than 0"));
        }

        if self.warden.port_count == 0 {
            return Err(ExecutorError::config_error("warden.port_count must be greater than 0"));
        }

        for family in ImageFamily::ALL {
            validate_targets(family, &self.pool.targets(family))?;
            validate_allocation(family, self.environments.allocation(family))?;

            let allocation = self.environments.allocation(family).resources();
            if !crate::resources::Resources::ZERO.fits(allocation, self.cluster.budget()) {
                return Err(ExecutorError::config_error(format!(
                    "environments.{family} does not fit in the cluster budget"
                )));
            }
        }

        Ok(())
    }
}

fn validate_targets(family: ImageFamily, targets: &CacheTargetData) -> Result<(), ExecutorError> {
    if targets.min > targets.max {
        return Err(ExecutorError::config_error(format!(
            "pool.{family}: min ({}) is greater than max ({})",
            targets.min, targets.max
        )));
    }
    if targets.current < targets.min || targets.current > targets.max {
        return Err(ExecutorError::config_error(format!(
            "pool.{family}: current ({}) must lie within [{}, {}]",
            targets.current, targets.min, targets.max
        )));
    }
    if targets.max == 0 {
        return Err(ExecutorError::config_error(format!("pool.{family}: max must be greater than 0")));
    }
    Ok(())
}

fn validate_allocation(family: ImageFamily, allocation: &FamilyAllocation) -> Result<(), ExecutorError> {
    if allocation.max_concurrent_jobs == 0 {
        return Err(ExecutorError::config_error(format!(
            "environments.{family}.max_concurrent_jobs must be greater than 0"
        )));
    }
    if allocation.vcpus <= 0.0 || allocation.memory_mb == 0 {
        return Err(ExecutorError::config_error(format!(
            "environments.{family} needs a positive cpu and memory allocation"
        )));
    }
    Ok(())
}
