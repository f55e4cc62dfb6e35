use agora::config::AgoraConfig;
use agora::governance::{Governance, GovernanceSettings};
use agora::store::open_store;
use agora::types::OrganizationId;

/// Recompute each treasury's ledger sum and compare it to the stored balance
///
/// Fails if any organization is inconsistent, so the command can gate
/// scripts and cron jobs.
pub async fn execute(
    config: &AgoraConfig,
    organization: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config.store).await?;
    let governance = Governance::new(store, GovernanceSettings::from_config(config)?);

    let audits = match organization {
        Some(id) => vec![governance.audit_ledger(OrganizationId(id)).await?],
        None => governance.audit_all().await?,
    };

    let mut mismatches = 0;
    for audit in &audits {
        if audit.consistent {
            println!(
                "✅ Organization {}: balance {} matches ledger",
                audit.organization_id, audit.balance
            );
        } else {
            mismatches += 1;
            println!(
                "❌ Organization {}: balance {} but ledger sums to {}",
                audit.organization_id, audit.balance, audit.ledger_sum
            );
        }
    }

    println!();
    println!("Audited {} organization(s)", audits.len());

    if mismatches > 0 {
        return Err(format!("{} organization(s) failed the ledger audit", mismatches).into());
    }
    Ok(())
}
