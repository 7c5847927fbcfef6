use bandsync_core::models::{ClientOperation, EntityKind, OperationKind, SubOperation};

use crate::cli::EnqueueArgs;
use crate::commands::common::{open_client, short_id, CliPaths};
use crate::error::CliError;

pub async fn run_enqueue(args: EnqueueArgs, paths: &CliPaths) -> Result<(), CliError> {
    let client = open_client(paths)?;
    let operation = build_operation(&args, client.context().tenant_id())?;
    let client_id = client.enqueue(operation).await?;
    let pending = client.pending_count().await?;

    println!(
        "Queued {} ({pending} pending)",
        short_id(&client_id.to_string())
    );
    Ok(())
}

/// Turn CLI arguments into a validated operation for `tenant_id`
pub fn build_operation(args: &EnqueueArgs, tenant_id: &str) -> Result<ClientOperation, CliError> {
    let entity = args.entity.parse::<EntityKind>()?;
    let kind = args.operation.parse::<OperationKind>()?;

    let mut operation = ClientOperation::new(entity, kind, args.entity_id.trim(), tenant_id);
    if let Some(raw) = &args.payload {
        let payload = serde_json::from_str(raw)
            .map_err(|error| CliError::InvalidArgument(format!("--payload is not valid JSON: {error}")))?;
        operation = operation.with_payload(payload);
    }
    if let Some(version) = args.base_version {
        operation = operation.with_base_version(version);
    }
    if !args.steps.is_empty() {
        let steps = args
            .steps
            .iter()
            .map(|raw| parse_step(raw))
            .collect::<Result<Vec<_>, _>>()?;
        operation = operation.with_sub_operations(steps);
    }

    operation.validate()?;
    Ok(operation)
}

/// Parse `<entity-id>:<position>`
pub fn parse_step(raw: &str) -> Result<SubOperation, CliError> {
    let (entity_id, position) = raw
        .rsplit_once(':')
        .ok_or_else(|| CliError::InvalidArgument(format!("step '{raw}' must look like <id>:<position>")))?;
    let entity_id = entity_id.trim();
    if entity_id.is_empty() {
        return Err(CliError::InvalidArgument(format!("step '{raw}' has no entity id")));
    }
    let position = position
        .trim()
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgument(format!("step '{raw}' has an invalid position")))?;
    Ok(SubOperation::new(entity_id, position))
}
