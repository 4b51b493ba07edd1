/// Entity collections addressable from the command line, and name lookup

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
  BusModels,
  Buses,
  Routes,
  Drivers,
  Terminals,
  Populations,
  Users,
}

#[derive(Debug, Clone)]
pub struct EntityInfo {
  pub kind: EntityKind,
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All collections
pub const ENTITIES: &[EntityInfo] = &[
  EntityInfo {
    kind: EntityKind::BusModels,
    name: "bus-models",
    aliases: &["bm", "models", "bus-model", "busmodels"],
    description: "Bus makes with seating and standing capacity",
  },
  EntityInfo {
    kind: EntityKind::Buses,
    name: "buses",
    aliases: &["b", "bus", "fleet"],
    description: "Vehicles in the fleet",
  },
  EntityInfo {
    kind: EntityKind::Routes,
    name: "routes",
    aliases: &["r", "route"],
    description: "Routes between terminals",
  },
  EntityInfo {
    kind: EntityKind::Drivers,
    name: "drivers",
    aliases: &["d", "driver"],
    description: "Licensed drivers",
  },
  EntityInfo {
    kind: EntityKind::Terminals,
    name: "terminals",
    aliases: &["t", "terminal", "stations"],
    description: "Terminals where routes start and end",
  },
  EntityInfo {
    kind: EntityKind::Populations,
    name: "populations",
    aliases: &["p", "population", "towns"],
    description: "Towns and cities served",
  },
  EntityInfo {
    kind: EntityKind::Users,
    name: "users",
    aliases: &["u", "user"],
    description: "Operators of the system",
  },
];

impl EntityKind {
  pub fn info(self) -> &'static EntityInfo {
    // every kind has exactly one table row
    ENTITIES
      .iter()
      .find(|info| info.kind == self)
      .unwrap_or(&ENTITIES[0])
  }

  pub fn name(self) -> &'static str {
    self.info().name
  }
}

/// Resolve an exact name or alias (case-insensitive)
pub fn resolve(input: &str) -> Option<EntityKind> {
  let input_lower = input.to_lowercase();
  ENTITIES
    .iter()
    .find(|e| e.name == input_lower || e.aliases.contains(&input_lower.as_str()))
    .map(|e| e.kind)
}

/// Get suggestions for a given input, best match first
pub fn get_suggestions(input: &str) -> Vec<&'static EntityInfo> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return ENTITIES.iter().collect();
  }

  let mut matches: Vec<(&EntityInfo, u32)> = Vec::new();

  for entity in ENTITIES {
    // Exact match on name
    if entity.name == input_lower {
      matches.push((entity, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if entity.aliases.contains(&input_lower.as_str()) {
      matches.push((entity, 1));
      continue;
    }

    // Prefix match on name
    if entity.name.starts_with(&input_lower) {
      matches.push((entity, 2));
      continue;
    }

    // Prefix match on alias
    if entity.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((entity, 3));
      continue;
    }

    // Fuzzy match (contains)
    if entity.name.contains(&input_lower) {
      matches.push((entity, 4));
      continue;
    }

    // Fuzzy match on alias
    if entity.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((entity, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(entity, _)| entity).collect()
}
