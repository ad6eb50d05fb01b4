pub fn uuid_v7() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::uuid_v7;

    #[test]
    fn generates_version_7_ids() {
        let id = uuid_v7();
        let parsed = uuid::Uuid::parse_str(&id).expect("valid uuid");
        assert_eq!(parsed.get_version_num(), 7);
        assert_ne!(id, uuid_v7());
    }
}
