use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockcart_core::{Aggregate, AggregateRoot, DomainError, OwnerId};
use stockcart_events::Event;

use crate::cart::CartId;

/// Stream type for the per-owner active-cart pointer.
pub const AGGREGATE_TYPE: &str = "cart.owner";

/// Aggregate root: OwnerCart.
///
/// Points at the owner's current cart. Switching the pointer is a compare-and-set on the
/// previously observed cart, which is what keeps an owner down to one ACTIVE cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerCart {
    owner_id: OwnerId,
    current: Option<CartId>,
    version: u64,
}

impl OwnerCart {
    pub fn empty(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            current: None,
            version: 0,
        }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// The most recently assigned cart. It may since have left ACTIVE.
    pub fn current(&self) -> Option<CartId> {
        self.current
    }
}

impl AggregateRoot for OwnerCart {
    type Id = OwnerId;

    fn id(&self) -> &Self::Id {
        &self.owner_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AssignActiveCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignActiveCart {
    pub owner_id: OwnerId,
    pub cart_id: CartId,
    /// The cart the caller saw in the pointer (None for a first cart).
    pub replaces: Option<CartId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerCartCommand {
    Assign(AssignActiveCart),
}

/// Event: ActiveCartAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCartAssigned {
    pub owner_id: OwnerId,
    pub cart_id: CartId,
    pub previous: Option<CartId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerCartEvent {
    ActiveCartAssigned(ActiveCartAssigned),
}

impl Event for OwnerCartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OwnerCartEvent::ActiveCartAssigned(_) => "cart.owner.active_cart_assigned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OwnerCartEvent::ActiveCartAssigned(e) => e.occurred_at,
        }
    }
}

impl Aggregate for OwnerCart {
    type Command = OwnerCartCommand;
    type Event = OwnerCartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OwnerCartEvent::ActiveCartAssigned(e) => {
                self.owner_id = e.owner_id;
                self.current = Some(e.cart_id);
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OwnerCartCommand::Assign(cmd) => self.handle_assign(cmd),
        }
    }
}

impl OwnerCart {
    fn handle_assign(&self, cmd: &AssignActiveCart) -> Result<Vec<OwnerCartEvent>, DomainError> {
        if cmd.owner_id != self.owner_id {
            return Err(DomainError::invariant("owner_id mismatch"));
        }
        if cmd.replaces != self.current {
            return Err(DomainError::conflict("active cart pointer moved"));
        }
        if self.current == Some(cmd.cart_id) {
            return Ok(vec![]);
        }

        Ok(vec![OwnerCartEvent::ActiveCartAssigned(ActiveCartAssigned {
            owner_id: cmd.owner_id,
            cart_id: cmd.cart_id,
            previous: self.current,
            occurred_at: cmd.occurred_at,
        })])
    }
}
