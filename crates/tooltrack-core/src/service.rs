//! Inventory orchestration across the repositories and the image store.

use chrono::NaiveDate;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{TrackerError, TrackerResult};
use crate::image::ImageStore;
use crate::models::{
    loan::{LendTool, Loan},
    person::{CreatePerson, Person},
    tenant::TenantId,
    tool::{CreateTool, Tool, UpdateTool},
};
use crate::policy;
use crate::repository::{LoanLedger, PersonRepository, ToolRepository};

/// Flows that touch more than one collaborator: tool images and
/// lending to a borrower identified by name.
#[derive(Clone)]
pub struct InventoryService<T, P, L, I> {
    tools: T,
    people: P,
    loans: L,
    images: I,
}

impl<T, P, L, I> InventoryService<T, P, L, I>
where
    T: ToolRepository,
    P: PersonRepository,
    L: LoanLedger,
    I: ImageStore,
{
    pub fn new(tools: T, people: P, loans: L, images: I) -> Self {
        Self {
            tools,
            people,
            loans,
            images,
        }
    }

    /// Create a tool, storing its image first. If the insert fails the
    /// stored image is released again.
    pub async fn create_tool(
        &self,
        mut input: CreateTool,
        image: Option<Vec<u8>>,
    ) -> TrackerResult<Tool> {
        let stored = match image {
            Some(bytes) => Some(self.images.store(&input.tenant_id, bytes).await?),
            None => None,
        };
        if stored.is_some() {
            input.image_ref = stored.clone();
        }

        match self.tools.create(input).await {
            Ok(tool) => Ok(tool),
            Err(err) => {
                if let Some(image_ref) = stored {
                    self.release_image(&image_ref).await;
                }
                Err(err)
            }
        }
    }

    /// Swap a tool's image. The previous image is released only after
    /// the tool points at the new one.
    pub async fn replace_tool_image(
        &self,
        tenant_id: &TenantId,
        tool_id: Uuid,
        bytes: Vec<u8>,
    ) -> TrackerResult<Tool> {
        let current = self.tools.get_by_id(tenant_id, tool_id).await?;
        let image_ref = self.images.store(tenant_id, bytes).await?;

        let update = UpdateTool {
            image_ref: Some(Some(image_ref.clone())),
            ..Default::default()
        };
        let tool = match self.tools.update(tenant_id, tool_id, update).await {
            Ok(tool) => tool,
            Err(err) => {
                self.release_image(&image_ref).await;
                return Err(err);
            }
        };

        if let Some(old) = current.image_ref {
            self.release_image(&old).await;
        }
        Ok(tool)
    }

    /// Delete a tool that is not lent out and release its image.
    pub async fn delete_tool(&self, tenant_id: &TenantId, tool_id: Uuid) -> TrackerResult<Tool> {
        let tool = self.tools.delete(tenant_id, tool_id).await?;
        if let Some(image_ref) = &tool.image_ref {
            self.release_image(image_ref).await;
        }
        Ok(tool)
    }

    /// Lend a tool to the tenant's person called `name`, creating the
    /// person on first use.
    pub async fn lend_to_named(
        &self,
        tenant_id: &TenantId,
        tool_id: Uuid,
        name: &str,
        lent_on: Option<NaiveDate>,
    ) -> TrackerResult<Loan> {
        let person = self.find_or_create_person(tenant_id, name).await?;
        self.loans
            .lend(LendTool {
                tenant_id: tenant_id.clone(),
                tool_id,
                person_id: person.id,
                lent_on: lent_on.map(policy::format_date),
            })
            .await
    }

    async fn find_or_create_person(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> TrackerResult<Person> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrackerError::validation("borrower name must not be empty"));
        }
        if let Some(person) = self.people.find_by_name(tenant_id, name).await? {
            return Ok(person);
        }

        let created = self
            .people
            .create(CreatePerson {
                tenant_id: tenant_id.clone(),
                name: name.to_string(),
                contact_info: String::new(),
            })
            .await;
        match created {
            Ok(person) => Ok(person),
            // Lost a race with a concurrent create of the same name.
            Err(TrackerError::DuplicateName { .. }) => self
                .people
                .find_by_name(tenant_id, name)
                .await?
                .ok_or_else(|| TrackerError::not_found("person", name)),
            Err(err) => Err(err),
        }
    }

    async fn release_image(&self, image_ref: &str) {
        match self.images.delete(image_ref).await {
            Ok(()) => debug!(image_ref, "Released tool image"),
            Err(err) => warn!(image_ref, error = %err, "Failed to release tool image"),
        }
    }
}
