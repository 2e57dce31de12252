//! Static registry of provider endpoints.
//!
//! Every entity type the provider exposes is described once here: the table
//! (and remote endpoint) it lives in, whether it can be looked up by slug, and
//! the ordered list of fields with their storage kind. The query compiler, the
//! entity mapper and the schema builder all consult this table instead of
//! branching on type names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity types known to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
  AgeRating,
  AlternativeName,
  Artwork,
  Collection,
  Company,
  CompanyLogo,
  Cover,
  Franchise,
  Game,
  GameMode,
  Genre,
  InvolvedCompany,
  Platform,
  PlatformFamily,
  PlatformLogo,
  Screenshot,
  Theme,
}

impl EntityKind {
  pub const ALL: [EntityKind; 17] = [
    EntityKind::AgeRating,
    EntityKind::AlternativeName,
    EntityKind::Artwork,
    EntityKind::Collection,
    EntityKind::Company,
    EntityKind::CompanyLogo,
    EntityKind::Cover,
    EntityKind::Franchise,
    EntityKind::Game,
    EntityKind::GameMode,
    EntityKind::Genre,
    EntityKind::InvolvedCompany,
    EntityKind::Platform,
    EntityKind::PlatformFamily,
    EntityKind::PlatformLogo,
    EntityKind::Screenshot,
    EntityKind::Theme,
  ];

  /// Type name as used in cache table names (e.g. "Game").
  pub fn name(self) -> &'static str {
    match self {
      EntityKind::AgeRating => "AgeRating",
      EntityKind::AlternativeName => "AlternativeName",
      EntityKind::Artwork => "Artwork",
      EntityKind::Collection => "Collection",
      EntityKind::Company => "Company",
      EntityKind::CompanyLogo => "CompanyLogo",
      EntityKind::Cover => "Cover",
      EntityKind::Franchise => "Franchise",
      EntityKind::Game => "Game",
      EntityKind::GameMode => "GameMode",
      EntityKind::Genre => "Genre",
      EntityKind::InvolvedCompany => "InvolvedCompany",
      EntityKind::Platform => "Platform",
      EntityKind::PlatformFamily => "PlatformFamily",
      EntityKind::PlatformLogo => "PlatformLogo",
      EntityKind::Screenshot => "Screenshot",
      EntityKind::Theme => "Theme",
    }
  }

  pub fn descriptor(self) -> &'static EndpointDescriptor {
    match self {
      EntityKind::AgeRating => &AGE_RATING,
      EntityKind::AlternativeName => &ALTERNATIVE_NAME,
      EntityKind::Artwork => &ARTWORK,
      EntityKind::Collection => &COLLECTION,
      EntityKind::Company => &COMPANY,
      EntityKind::CompanyLogo => &COMPANY_LOGO,
      EntityKind::Cover => &COVER,
      EntityKind::Franchise => &FRANCHISE,
      EntityKind::Game => &GAME,
      EntityKind::GameMode => &GAME_MODE,
      EntityKind::Genre => &GENRE,
      EntityKind::InvolvedCompany => &INVOLVED_COMPANY,
      EntityKind::Platform => &PLATFORM,
      EntityKind::PlatformFamily => &PLATFORM_FAMILY,
      EntityKind::PlatformLogo => &PLATFORM_LOGO,
      EntityKind::Screenshot => &SCREENSHOT,
      EntityKind::Theme => &THEME,
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type '{0}'")]
pub struct UnknownEntityKind(pub String);

impl FromStr for EntityKind {
  type Err = UnknownEntityKind;

  /// Accepts the type name ("Game", case-insensitive) or its table name ("games").
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    EntityKind::ALL
      .into_iter()
      .find(|kind| kind.name().eq_ignore_ascii_case(s) || kind.descriptor().table_name == s)
      .ok_or_else(|| UnknownEntityKind(s.to_string()))
  }
}

/// How a field is stored and converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
  /// Primary key
  Id,
  /// Single foreign id wrapped as a reference to another type
  Ref(EntityKind),
  /// List of foreign ids
  RefList(EntityKind),
  /// Timestamp with offset (stored naive, UTC)
  Timestamp,
  Int32Array,
  Int64Array,
  DoubleArray,
  /// Provider enumeration stored as its integer value
  Enum,
  Integer,
  Double,
  Boolean,
  Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
  pub name: &'static str,
  pub kind: FieldKind,
}

impl FieldDescriptor {
  /// Target entity type for reference fields.
  pub fn target(&self) -> Option<EntityKind> {
    match self.kind {
      FieldKind::Ref(target) | FieldKind::RefList(target) => Some(target),
      _ => None,
    }
  }
}

/// Description of one provider endpoint.
#[derive(Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
  pub kind: EntityKind,
  /// Remote endpoint and bulk-mirror table name
  pub table_name: &'static str,
  pub supports_slug: bool,
  /// Ordered field list; always starts with `id`
  pub fields: &'static [FieldDescriptor],
}

impl EndpointDescriptor {
  pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
    self.fields.iter().find(|f| f.name == name)
  }

  /// Reference fields and the type each one points at.
  pub fn related_fields(&self) -> impl Iterator<Item = (&'static str, EntityKind)> + '_ {
    self
      .fields
      .iter()
      .filter_map(|f| f.target().map(|target| (f.name, target)))
  }

  /// Name of the local cache table for this type under a source prefix.
  pub fn cache_table(&self, prefix: &str) -> String {
    format!("{}_{}", prefix, self.kind.name())
  }
}

// ============================================================================
// Field helpers
// ============================================================================

const fn id() -> FieldDescriptor {
  FieldDescriptor {
    name: "id",
    kind: FieldKind::Id,
  }
}

const fn field(name: &'static str, kind: FieldKind) -> FieldDescriptor {
  FieldDescriptor { name, kind }
}

const fn text(name: &'static str) -> FieldDescriptor {
  field(name, FieldKind::Text)
}

const fn integer(name: &'static str) -> FieldDescriptor {
  field(name, FieldKind::Integer)
}

const fn double(name: &'static str) -> FieldDescriptor {
  field(name, FieldKind::Double)
}

const fn boolean(name: &'static str) -> FieldDescriptor {
  field(name, FieldKind::Boolean)
}

const fn timestamp(name: &'static str) -> FieldDescriptor {
  field(name, FieldKind::Timestamp)
}

const fn enumeration(name: &'static str) -> FieldDescriptor {
  field(name, FieldKind::Enum)
}

const fn reference(name: &'static str, target: EntityKind) -> FieldDescriptor {
  field(name, FieldKind::Ref(target))
}

const fn references(name: &'static str, target: EntityKind) -> FieldDescriptor {
  field(name, FieldKind::RefList(target))
}

// ============================================================================
// Endpoints
// ============================================================================

static GAME: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Game,
  table_name: "games",
  supports_slug: true,
  fields: &[
    id(),
    text("name"),
    text("slug"),
    text("summary"),
    text("storyline"),
    text("url"),
    text("checksum"),
    enumeration("category"),
    enumeration("status"),
    timestamp("first_release_date"),
    double("rating"),
    integer("rating_count"),
    double("aggregated_rating"),
    integer("aggregated_rating_count"),
    double("total_rating"),
    integer("total_rating_count"),
    integer("follows"),
    integer("hypes"),
    reference("cover", EntityKind::Cover),
    reference("collection", EntityKind::Collection),
    reference("franchise", EntityKind::Franchise),
    reference("parent_game", EntityKind::Game),
    references("age_ratings", EntityKind::AgeRating),
    references("alternative_names", EntityKind::AlternativeName),
    references("artworks", EntityKind::Artwork),
    references("franchises", EntityKind::Franchise),
    references("game_modes", EntityKind::GameMode),
    references("genres", EntityKind::Genre),
    references("involved_companies", EntityKind::InvolvedCompany),
    references("platforms", EntityKind::Platform),
    references("screenshots", EntityKind::Screenshot),
    references("similar_games", EntityKind::Game),
    references("themes", EntityKind::Theme),
    field("tags", FieldKind::Int32Array),
    timestamp("created_at"),
    timestamp("updated_at"),
  ],
};

static PLATFORM: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Platform,
  table_name: "platforms",
  supports_slug: true,
  fields: &[
    id(),
    text("name"),
    text("slug"),
    text("abbreviation"),
    text("alternative_name"),
    enumeration("category"),
    integer("generation"),
    text("summary"),
    text("url"),
    text("checksum"),
    reference("platform_logo", EntityKind::PlatformLogo),
    reference("platform_family", EntityKind::PlatformFamily),
    timestamp("created_at"),
    timestamp("updated_at"),
  ],
};

static PLATFORM_FAMILY: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::PlatformFamily,
  table_name: "platform_families",
  supports_slug: true,
  fields: &[id(), text("name"), text("slug"), text("checksum")],
};

static COMPANY: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Company,
  table_name: "companies",
  supports_slug: true,
  fields: &[
    id(),
    text("name"),
    text("slug"),
    text("description"),
    integer("country"),
    timestamp("start_date"),
    text("url"),
    text("checksum"),
    reference("logo", EntityKind::CompanyLogo),
    reference("parent", EntityKind::Company),
    references("developed", EntityKind::Game),
    references("published", EntityKind::Game),
    timestamp("created_at"),
    timestamp("updated_at"),
  ],
};

static INVOLVED_COMPANY: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::InvolvedCompany,
  table_name: "involved_companies",
  supports_slug: false,
  fields: &[
    id(),
    reference("company", EntityKind::Company),
    reference("game", EntityKind::Game),
    boolean("developer"),
    boolean("publisher"),
    boolean("porting"),
    boolean("supporting"),
    text("checksum"),
    timestamp("created_at"),
    timestamp("updated_at"),
  ],
};

static AGE_RATING: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::AgeRating,
  table_name: "age_ratings",
  supports_slug: false,
  fields: &[
    id(),
    enumeration("category"),
    enumeration("rating"),
    text("synopsis"),
    text("rating_cover_url"),
    field("content_descriptions", FieldKind::Int64Array),
    text("checksum"),
  ],
};

static ALTERNATIVE_NAME: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::AlternativeName,
  table_name: "alternative_names",
  supports_slug: false,
  fields: &[
    id(),
    text("name"),
    text("comment"),
    reference("game", EntityKind::Game),
    text("checksum"),
  ],
};

static COVER: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Cover,
  table_name: "covers",
  supports_slug: false,
  fields: &[
    id(),
    reference("game", EntityKind::Game),
    text("image_id"),
    text("url"),
    integer("width"),
    integer("height"),
    boolean("alpha_channel"),
    boolean("animated"),
    text("checksum"),
  ],
};

static ARTWORK: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Artwork,
  table_name: "artworks",
  supports_slug: false,
  fields: &[
    id(),
    reference("game", EntityKind::Game),
    text("image_id"),
    text("url"),
    integer("width"),
    integer("height"),
    boolean("alpha_channel"),
    boolean("animated"),
    text("checksum"),
  ],
};

static SCREENSHOT: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Screenshot,
  table_name: "screenshots",
  supports_slug: false,
  fields: &[
    id(),
    reference("game", EntityKind::Game),
    text("image_id"),
    text("url"),
    integer("width"),
    integer("height"),
    boolean("alpha_channel"),
    boolean("animated"),
    text("checksum"),
  ],
};

static PLATFORM_LOGO: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::PlatformLogo,
  table_name: "platform_logos",
  supports_slug: false,
  fields: &[
    id(),
    text("image_id"),
    text("url"),
    integer("width"),
    integer("height"),
    boolean("alpha_channel"),
    boolean("animated"),
    text("checksum"),
  ],
};

static COMPANY_LOGO: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::CompanyLogo,
  table_name: "company_logos",
  supports_slug: false,
  fields: &[
    id(),
    text("image_id"),
    text("url"),
    integer("width"),
    integer("height"),
    boolean("alpha_channel"),
    boolean("animated"),
    text("checksum"),
  ],
};

static COLLECTION: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Collection,
  table_name: "collections",
  supports_slug: true,
  fields: &[
    id(),
    text("name"),
    text("slug"),
    text("url"),
    text("checksum"),
    references("games", EntityKind::Game),
    timestamp("created_at"),
    timestamp("updated_at"),
  ],
};

static FRANCHISE: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Franchise,
  table_name: "franchises",
  supports_slug: true,
  fields: &[
    id(),
    text("name"),
    text("slug"),
    text("url"),
    text("checksum"),
    references("games", EntityKind::Game),
    timestamp("created_at"),
    timestamp("updated_at"),
  ],
};

static GENRE: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Genre,
  table_name: "genres",
  supports_slug: true,
  fields: &[
    id(),
    text("name"),
    text("slug"),
    text("url"),
    text("checksum"),
    timestamp("created_at"),
    timestamp("updated_at"),
  ],
};

static THEME: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::Theme,
  table_name: "themes",
  supports_slug: true,
  fields: &[
    id(),
    text("name"),
    text("slug"),
    text("url"),
    text("checksum"),
    timestamp("created_at"),
    timestamp("updated_at"),
  ],
};

static GAME_MODE: EndpointDescriptor = EndpointDescriptor {
  kind: EntityKind::GameMode,
  table_name: "game_modes",
  supports_slug: true,
  fields: &[
    id(),
    text("name"),
    text("slug"),
    text("url"),
    text("checksum"),
    timestamp("created_at"),
    timestamp("updated_at"),
  ],
};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_every_descriptor_matches_its_kind() {
    for kind in EntityKind::ALL {
      let descriptor = kind.descriptor();
      assert_eq!(descriptor.kind, kind);
      assert_eq!(descriptor.fields[0], id(), "{} must start with id", kind);
    }
  }

  #[test]
  fn test_field_names_are_unique() {
    for kind in EntityKind::ALL {
      let fields = kind.descriptor().fields;
      for (i, a) in fields.iter().enumerate() {
        assert!(
          fields[i + 1..].iter().all(|b| b.name != a.name),
          "duplicate field {} on {}",
          a.name,
          kind
        );
      }
    }
  }

  #[test]
  fn test_slug_support_implies_slug_field() {
    for kind in EntityKind::ALL {
      let descriptor = kind.descriptor();
      if descriptor.supports_slug {
        assert!(descriptor.field("slug").is_some(), "{} lacks slug", kind);
      }
    }
  }

  #[test]
  fn test_related_fields() {
    let related: Vec<_> = EntityKind::Cover.descriptor().related_fields().collect();
    assert_eq!(related, vec![("game", EntityKind::Game)]);

    let game = EntityKind::Game.descriptor();
    assert!(game
      .related_fields()
      .any(|(name, target)| name == "platforms" && target == EntityKind::Platform));
  }

  #[test]
  fn test_parse_kind() {
    assert_eq!("game".parse::<EntityKind>().unwrap(), EntityKind::Game);
    assert_eq!(
      "involved_companies".parse::<EntityKind>().unwrap(),
      EntityKind::InvolvedCompany
    );
    assert!("console".parse::<EntityKind>().is_err());
  }

  #[test]
  fn test_cache_table_name() {
    assert_eq!(EntityKind::Game.descriptor().cache_table("IGDB"), "IGDB_Game");
  }
}
