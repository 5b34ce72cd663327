//! Authorization policy. Every operation asks `authorize` and nothing else decides.
use crate::error::OrderError;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    SuperAdmin,
    CateringAdmin,
    ClientAdmin,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Affiliation {
    Platform,
    Catering {
        catering_id: String,
    },
    Client {
        catering_id: String,
        client_id: String,
    },
}

/// Identity supplied by the authentication layer for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub name: String,
    pub role: Role,
    pub affiliation: Affiliation,
}

impl Actor {
    pub fn super_admin(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            role: Role::SuperAdmin,
            affiliation: Affiliation::Platform,
        }
    }
    pub fn catering_admin(
        user_id: impl Into<String>,
        name: impl Into<String>,
        catering_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            role: Role::CateringAdmin,
            affiliation: Affiliation::Catering {
                catering_id: catering_id.into(),
            },
        }
    }
    pub fn client_admin(
        user_id: impl Into<String>,
        name: impl Into<String>,
        catering_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            role: Role::ClientAdmin,
            affiliation: Affiliation::Client {
                catering_id: catering_id.into(),
                client_id: client_id.into(),
            },
        }
    }
    pub fn user(
        user_id: impl Into<String>,
        name: impl Into<String>,
        catering_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::User,
            ..Self::client_admin(user_id, name, catering_id, client_id)
        }
    }

    fn administers_catering(&self, catering: &str) -> bool {
        let Affiliation::Catering { catering_id } = &self.affiliation else {
            return false;
        };
        self.role == Role::CateringAdmin && catering_id == catering
    }

    fn member_of_client(&self, catering: &str, client: &str) -> bool {
        matches!(
            &self.affiliation,
            Affiliation::Client { catering_id, client_id }
                if catering_id == catering && client_id == client
        )
    }

    fn administers_client(&self, catering: &str, client: &str) -> bool {
        self.role == Role::ClientAdmin && self.member_of_client(catering, client)
    }
}

/// Operation being attempted, tagged with the tenant it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    DefineMenu {
        catering_id: &'a str,
    },
    PlaceOrder {
        owner_id: &'a str,
        catering_id: &'a str,
        client_id: &'a str,
    },
    CancelOrder {
        owner_id: &'a str,
        catering_id: &'a str,
        client_id: &'a str,
    },
    ApproveOrders {
        catering_id: &'a str,
        client_id: &'a str,
    },
    ViewOrders {
        catering_id: &'a str,
        client_id: Option<&'a str>,
    },
}

pub fn is_allowed(actor: &Actor, action: &Action<'_>) -> bool {
    let super_admin = actor.role == Role::SuperAdmin;

    match *action {
        Action::DefineMenu { catering_id } => {
            super_admin || actor.administers_catering(catering_id)
        }
        Action::PlaceOrder {
            owner_id,
            catering_id,
            client_id,
        } => {
            super_admin
                || (actor.user_id == owner_id && actor.member_of_client(catering_id, client_id))
                || actor.administers_client(catering_id, client_id)
        }
        Action::CancelOrder {
            owner_id,
            catering_id,
            client_id,
        } => {
            super_admin
                || actor.user_id == owner_id
                || actor.administers_client(catering_id, client_id)
                || actor.administers_catering(catering_id)
        }
        Action::ApproveOrders {
            catering_id,
            client_id,
        } => {
            actor.administers_client(catering_id, client_id)
                || actor.administers_catering(catering_id)
        }
        Action::ViewOrders {
            catering_id,
            client_id,
        } => {
            super_admin
                || actor.administers_catering(catering_id)
                || client_id.is_some_and(|client| actor.administers_client(catering_id, client))
        }
    }
}

pub fn authorize(actor: &Actor, action: &Action<'_>) -> Result<(), OrderError> {
    if is_allowed(actor, action) {
        return Ok(());
    }
    warn!(actor = %actor.user_id, role = ?actor.role, ?action, "authorization denied");
    Err(OrderError::Forbidden)
}
