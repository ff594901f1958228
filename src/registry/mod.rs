use parking_lot::RwLock;

/// Insertion-ordered, deduplicating collector of method full names.
///
/// Handlers register themselves at construction; an external reflection
/// service reads the list. Callers must stop registering once the server
/// begins handling traffic.
#[derive(Debug, Default)]
pub struct Registrar {
    methods: RwLock<Vec<String>>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, method: &str) {
        let mut methods = self.methods.write();
        if !methods.iter().any(|m| m == method) {
            methods.push(method.to_string());
        }
    }

    /// Registered method names in registration order.
    pub fn methods(&self) -> Vec<String> {
        self.methods.read().clone()
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_preserved() {
        let registrar = Registrar::new();
        registrar.register("pkg.B/Two");
        registrar.register("pkg.A/One");
        registrar.register("pkg.C/Three");

        assert_eq!(
            registrar.methods(),
            vec!["pkg.B/Two", "pkg.A/One", "pkg.C/Three"]
        );
    }

    #[test]
    fn test_duplicates_collapsed() {
        let registrar = Registrar::new();
        registrar.register("pkg.A/One");
        registrar.register("pkg.A/One");

        assert_eq!(registrar.len(), 1);
    }

    #[test]
    fn test_empty() {
        let registrar = Registrar::new();
        assert!(registrar.is_empty());
        assert_eq!(registrar.methods(), Vec::<String>::new());
    }
}
