use crate::error::ReconError;
use crate::store::BaseStore;

/// Drop-then-add the named uniqueness constraint on the base key column.
///
/// An existing constraint is never trusted: the base may have been reloaded
/// or edited outside a run since it was created. Residual duplicate keys fail
/// the run with `ConstraintViolation`.
pub fn enforce_unique_key<S: BaseStore + ?Sized>(
    base: &mut S,
    constraint_name: &str,
) -> Result<(), ReconError> {
    if base.drop_constraint(constraint_name)? {
        log::warn!("replacing existing constraint '{constraint_name}'");
    }

    base.add_unique_constraint(constraint_name)?;

    if !base.has_constraint(constraint_name)? {
        return Err(ReconError::StorageFailure(format!(
            "constraint '{constraint_name}' missing after creation"
        )));
    }

    log::debug!("constraint '{constraint_name}' active");
    Ok(())
}
