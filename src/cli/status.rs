use agora::config::AgoraConfig;
use agora::store::open_store;
use agora::types::{Amount, OrganizationId, Timestamp, UserId};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct OrganizationStatus {
    id: OrganizationId,
    name: String,
    owner_id: UserId,
    created_at: Timestamp,
    member_count: u64,
    balance: Option<Amount>,
    currency: Option<String>,
}

/// Print every organization with member count and treasury balance
///
/// Output is a JSON array, most recently created organization first.
pub async fn execute(config: &AgoraConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config.store).await?;

    let mut report = Vec::new();
    for organization in store.organizations().await? {
        let member_count = store.count_approved_members(organization.id).await?;
        let treasury = store.treasury(organization.id).await?;

        report.push(OrganizationStatus {
            id: organization.id,
            name: organization.name,
            owner_id: organization.owner_id,
            created_at: organization.created_at,
            member_count,
            balance: treasury.as_ref().map(|t| t.balance),
            currency: treasury.map(|t| t.currency),
        });
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
