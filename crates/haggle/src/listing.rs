//! Listing and community collaborators.
//!
//! Both are owned elsewhere. A conversation only reads them, except for the
//! single `open = false` write when a listing is closed on acceptance.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{CommunityId, ListingId, PersonId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    Offer,
    Request,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Offer => "offer",
            ListingType::Request => "request",
        }
    }

    /// The other side of the market.
    pub fn inverse(self) -> Self {
        match self {
            ListingType::Offer => ListingType::Request,
            ListingType::Request => ListingType::Offer,
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ListingType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "offer" => Ok(ListingType::Offer),
            "request" => Ok(ListingType::Request),
            _ => Err(anyhow::anyhow!("Invalid listing type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub author_id: PersonId,
    pub listing_type: ListingType,
    pub open: bool,
}

impl Listing {
    pub fn new(author_id: PersonId, listing_type: ListingType) -> Self {
        Self {
            id: ListingId::new(),
            author_id,
            listing_type,
            open: true,
        }
    }

    pub fn is_author(&self, person: PersonId) -> bool {
        self.author_id == person
    }

    /// The author offers on an offer listing; on a request listing whoever
    /// answers the author is the one offering.
    pub fn is_offerer(&self, person: PersonId) -> bool {
        match self.listing_type {
            ListingType::Offer => self.is_author(person),
            ListingType::Request => !self.is_author(person),
        }
    }

    pub fn is_requester(&self, person: PersonId) -> bool {
        match self.listing_type {
            ListingType::Offer => !self.is_author(person),
            ListingType::Request => self.is_author(person),
        }
    }

    pub fn close(&mut self) {
        self.open = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub payments_in_use: bool,
}

impl Community {
    pub fn new(payments_in_use: bool) -> Self {
        Self {
            id: CommunityId::new(),
            payments_in_use,
        }
    }
}
