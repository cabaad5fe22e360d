/// Ordered set of named providers. Order is priority: the first entry is
/// tried first.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

pub trait NamedProvider {
    fn name(&self) -> &str;
}

impl<T: NamedProvider> NamedProvider for Box<T>
where
    T: ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: NamedProvider> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    /// Appends at the lowest priority. A provider with the same name is replaced in place.
    pub fn push(&mut self, provider: T) {
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|existing| existing.name() == provider.name())
        {
            *slot = provider;
            return;
        }
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
    }

    /// Names sorted alphabetically, for display.
    pub fn list(&self) -> Vec<String> {
        let mut names = self.names_in_order();
        names.sort();
        names
    }

    pub fn names_in_order(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{NamedProvider, ProviderRegistry};

    #[derive(Clone, Debug)]
    struct DummyProvider {
        name: String,
        tag: u8,
    }

    impl NamedProvider for DummyProvider {
        fn name(&self) -> &str {
            self.name.as_str()
        }
    }

    fn dummy(name: &str, tag: u8) -> DummyProvider {
        DummyProvider {
            name: name.to_string(),
            tag,
        }
    }

    #[test]
    fn registry_keeps_priority_order_and_sorts_listing() {
        let registry = ProviderRegistry::new(vec![dummy("z", 0), dummy("a", 0), dummy("m", 0)]);
        assert_eq!(registry.list(), vec!["a", "m", "z"]);
        assert_eq!(registry.names_in_order(), vec!["z", "a", "m"]);
        assert_eq!(registry.get("a").map(|provider| provider.name()), Some("a"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn push_replaces_same_name_in_place() {
        let mut registry = ProviderRegistry::default();
        registry.push(dummy("pollinations", 1));
        registry.push(dummy("picsum", 1));
        registry.push(dummy("pollinations", 2));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names_in_order(), vec!["pollinations", "picsum"]);
        assert_eq!(registry.get("pollinations").map(|provider| provider.tag), Some(2));
    }

    #[test]
    fn boxed_providers_are_named() {
        let registry: ProviderRegistry<Box<DummyProvider>> =
            ProviderRegistry::new(vec![Box::new(dummy("boxed", 0))]);
        assert!(!registry.is_empty());
        assert_eq!(registry.list(), vec!["boxed"]);
    }
}
