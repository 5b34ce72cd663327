//! Meal Versioner: the append-only history of what was offered to a client on a day
use crate::collaborators::{Catalog, Clock, Lifecycle, Organizations};
use crate::error::{OrderError, log_failure};
use crate::meal::{Day, DishReference, MealGroup, MealVersion, TimeStamp, menu_digest};
use crate::policy::{Action, Actor, authorize};
use crate::store::{Store, group_key, load_tx, save_tx};
use crate::utils::{MEAL_GROUP_HRP, MEAL_VERSION_HRP, new_uuid_to_bech32};
use sled::Transactional;
use sled::transaction::ConflictableTransactionResult;
use std::sync::Arc;
use tracing::{debug, info};

pub struct MealVersioner {
    store: Store,
    catalog: Arc<dyn Catalog>,
    organizations: Arc<dyn Organizations>,
    clock: Arc<dyn Clock>,
}

impl MealVersioner {
    pub fn new(
        store: Store,
        catalog: Arc<dyn Catalog>,
        organizations: Arc<dyn Organizations>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            organizations,
            clock,
        }
    }

    /// Pin `dish_ids` as the new current menu for the day. Earlier versions stay readable.
    pub fn define_version(
        &self,
        editor: &Actor,
        catering_id: &str,
        client_id: &str,
        day: Day,
        dish_ids: &[String],
    ) -> Result<MealVersion, OrderError> {
        self.define(editor, catering_id, client_id, day, dish_ids)
            .inspect_err(log_failure("define_version"))
    }

    /// Highest labelled version of the day.
    pub fn current_version(
        &self,
        catering_id: &str,
        client_id: &str,
        day: Day,
    ) -> Result<MealVersion, OrderError> {
        self.current(catering_id, client_id, day)
            .inspect_err(log_failure("current_version"))
    }

    /// Every version of the day, newest first. Empty when nothing was ever defined.
    pub fn history(
        &self,
        catering_id: &str,
        client_id: &str,
        day: Day,
    ) -> Result<Vec<MealVersion>, OrderError> {
        self.versions_of(catering_id, client_id, day)
            .inspect_err(log_failure("history"))
    }

    pub fn version(&self, version_id: &str) -> Result<MealVersion, OrderError> {
        self.store
            .version(version_id)
            .inspect_err(log_failure("version"))?
            .ok_or_else(|| OrderError::NotFound(format!("meal version {version_id}")))
    }

    fn define(
        &self,
        editor: &Actor,
        catering_id: &str,
        client_id: &str,
        day: Day,
        dish_ids: &[String],
    ) -> Result<MealVersion, OrderError> {
        authorize(editor, &Action::DefineMenu { catering_id })?;

        if !self
            .organizations
            .client_belongs_to_catering(client_id, catering_id)
        {
            return Err(OrderError::InvalidReference(format!(
                "client {client_id} of catering {catering_id}"
            )));
        }

        if day < self.clock.today() {
            return Err(OrderError::InvalidDate(day));
        }

        let dishes = self.snapshot_dishes(catering_id, dish_ids)?;
        let digest = menu_digest(&dishes)?;

        let key = group_key(catering_id, client_id, day);
        let version_id = new_uuid_to_bech32(MEAL_VERSION_HRP)?;
        let fresh_group_key = new_uuid_to_bech32(MEAL_GROUP_HRP)?;
        let created_at = TimeStamp::from(self.clock.now());

        // label assignment and the group pointer move together or not at all
        let version = (&self.store.meal_groups, &self.store.meal_versions).transaction(
            |(groups, versions)| -> ConflictableTransactionResult<MealVersion, OrderError> {
                let mut group: MealGroup = load_tx(groups, &key)?
                    .unwrap_or_else(|| MealGroup::new(fresh_group_key.clone()));

                let version = MealVersion {
                    id: version_id.clone(),
                    group_key: group.group_key.clone(),
                    sequence: group.next_sequence(),
                    catering_id: catering_id.to_string(),
                    client_id: client_id.to_string(),
                    day,
                    created_at: created_at.clone(),
                    editor: editor.name.clone(),
                    dishes: dishes.clone(),
                    menu_digest: digest.clone(),
                };

                save_tx(versions, &version.id, &version)?;
                group.versions.push(version.id.clone());
                save_tx(groups, &key, &group)?;

                Ok(version)
            },
        )?;

        info!(
            catering = catering_id,
            client = client_id,
            %day,
            label = %version.label(),
            dishes = version.dishes.len(),
            editor = %version.editor,
            "meal version defined"
        );

        Ok(version)
    }

    fn current(
        &self,
        catering_id: &str,
        client_id: &str,
        day: Day,
    ) -> Result<MealVersion, OrderError> {
        let key = group_key(catering_id, client_id, day);
        let group = self
            .store
            .group(&key)?
            .ok_or_else(|| OrderError::NotFound(format!("meal for {key}")))?;
        let current = group
            .current()
            .ok_or_else(|| OrderError::NotFound(format!("meal for {key}")))?;

        debug!(%key, version = current, "resolving current meal version");
        self.version(current)
    }

    fn versions_of(
        &self,
        catering_id: &str,
        client_id: &str,
        day: Day,
    ) -> Result<Vec<MealVersion>, OrderError> {
        let key = group_key(catering_id, client_id, day);
        let Some(group) = self.store.group(&key)? else {
            return Ok(vec![]);
        };

        group
            .versions
            .iter()
            .rev()
            .map(|id| self.version(id))
            .collect()
    }

    // Repeated ids are pinned once, in first-seen order.
    fn snapshot_dishes(
        &self,
        catering_id: &str,
        dish_ids: &[String],
    ) -> Result<Vec<DishReference>, OrderError> {
        let mut dishes: Vec<DishReference> = Vec::with_capacity(dish_ids.len());

        for dish_id in dish_ids {
            if dishes.iter().any(|dish| &dish.id == dish_id) {
                continue;
            }
            let dish = self
                .catalog
                .lookup(catering_id, dish_id)
                .filter(|dish| dish.lifecycle == Lifecycle::Active);
            let Some(dish) = dish else {
                let reference = format!("dish {dish_id} of catering {catering_id}");
                return Err(OrderError::InvalidReference(reference));
            };
            dishes.push(dish.snapshot());
        }

        Ok(dishes)
    }
}
