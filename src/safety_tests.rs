//! Safety Gate Tests for Binder Compiler Invariants
//!
//! These tests verify that a unit which cannot be compiled correctly fails
//! with its diagnostic code and produces no source:
//! - BC-ERR-CYCLE-001: expressions that depend on themselves
//! - BC-ERR-STALL-002: a batch that cannot make progress
//! - BC-ERR-CACHE-003: a flag layout that drifted from the cached one
//! - BC-ERR-UNREAD-004: expressions left unread after scheduling
//! - BC-ERR-INPUT-005: malformed graphs

#[cfg(test)]
mod tests {
    use crate::allocator::FlagLayoutSnapshot;
    use crate::cache::IncrementalCache;
    use crate::error::GenerationError;
    use crate::parse::{compile_graph, compile_layout_internal, compile_source, CompileOptions};
    use crate::validate::{
        BindingInput, ConditionInput, DependencyInput, ExprKind, ExpressionInput, GraphInput,
        BC_ERR_CACHE, BC_ERR_CYCLE, BC_ERR_INPUT, BC_ERR_STALL, BC_ERR_UNREAD,
    };

    fn unit(expressions: Vec<ExpressionInput>, bound: usize) -> GraphInput {
        GraphInput {
            layout: "safety".into(),
            package: "com.example".into(),
            class_name: None,
            expressions,
            bindings: vec![BindingInput {
                target: "label".into(),
                attribute: "android:text".into(),
                expr: bound,
                components: None,
                setter: "{target}.setText({0})".into(),
                min_api: 1,
                requires_old_value: false,
            }],
            variables: vec![],
        }
    }

    fn variable(name: &str) -> ExpressionInput {
        ExpressionInput {
            kind: ExprKind::Identifier,
            code: name.into(),
            variable: true,
            ..Default::default()
        }
    }

    fn depends_on(expr: usize) -> DependencyInput {
        DependencyInput {
            expr,
            conditional: None,
        }
    }

    fn compile_error(graph: &GraphInput) -> GenerationError {
        match compile_graph(graph, &CompileOptions::default()) {
            Ok(unit) => panic!("expected failure, got source:\n{}", unit.source),
            Err(e) => e,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BC-ERR-CYCLE-001: Circular Dependencies
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn mandatory_cycle_fails_before_emission() {
        let json = r#"{
            "layout": "loop",
            "expressions": [
                { "key": "a", "code": "f({0})", "dynamic": true, "dependencies": [ { "expr": 1 } ] },
                { "key": "b", "code": "g({0})", "dynamic": true, "dependencies": [ { "expr": 0 } ] }
            ],
            "bindings": [ { "target": "label", "attribute": "android:text", "expr": 0,
                            "setter": "{target}.setText({0})" } ]
        }"#;
        let result = compile_layout_internal(json, "loop.binding.json", &CompileOptions::default());
        assert!(result.source.is_none(), "no code may be emitted for a cyclic unit");
        assert_eq!(result.errors.len(), 1);
        let error = &result.errors[0];
        assert_eq!(error.code, BC_ERR_CYCLE);
        assert_eq!(error.error_type, "STRUCTURAL_ERROR");
        let context = error.context.as_deref().unwrap_or_default();
        assert!(context.contains('a') && context.contains('b'), "{}", context);
    }

    #[test]
    fn cycle_through_a_ternary_arm_is_caught() {
        // [0] p ? [1] : q, where [1] = h([0])
        let ternary = ExpressionInput {
            kind: ExprKind::Ternary,
            code: "{0} ? {1} : {2}".into(),
            children: vec![2, 1, 3],
            ..Default::default()
        };
        let arm = ExpressionInput {
            key: Some("arm".into()),
            kind: ExprKind::MethodCall,
            code: "h({0})".into(),
            children: vec![0],
            ..Default::default()
        };
        let graph = unit(vec![ternary, arm, variable("p"), variable("q")], 0);
        let err = compile_error(&graph);
        assert_eq!(err.code(), BC_ERR_CYCLE);
        match err {
            GenerationError::Cycle { path } => assert!(path.contains(&"arm".to_string())),
            other => panic!("expected cycle, got {other}"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BC-ERR-STALL-002: No Progress
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn dependency_that_is_never_read_stalls_the_batch() {
        // f(K) is dynamic on its own but depends on a constant that no pass reads.
        let constant = ExpressionInput {
            kind: ExprKind::Symbol,
            code: "K".into(),
            ..Default::default()
        };
        let reader = ExpressionInput {
            code: "f({0})".into(),
            children: vec![0],
            dynamic: true,
            dependencies: Some(vec![depends_on(0)]),
            ..Default::default()
        };
        let err = compile_error(&unit(vec![constant, reader], 1));
        assert_eq!(err.code(), BC_ERR_STALL);
        match &err {
            GenerationError::NoProgress { pending, .. } => {
                assert_eq!(pending, &vec!["f(K)".to_string()]);
            }
            other => panic!("expected no progress, got {other}"),
        }
        let diagnostic = err.into_compiler_error("safety.binding.json");
        assert!(diagnostic.hints[0].contains("circular"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BC-ERR-UNREAD-004: Unreadable Expressions
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn arm_without_a_predicate_edge_is_left_unread() {
        // The ternary declares its true arm but no edge to the predicate, so
        // no pass ever decides the branch.
        let ternary = ExpressionInput {
            kind: ExprKind::Ternary,
            code: "{0} ? {1} : {2}".into(),
            children: vec![1, 2, 3],
            dependencies: Some(vec![DependencyInput {
                expr: 2,
                conditional: Some(ConditionInput {
                    predicate: 1,
                    branch: true,
                }),
            }]),
            ..Default::default()
        };
        let fallback = ExpressionInput {
            kind: ExprKind::Symbol,
            code: "null".into(),
            ..Default::default()
        };
        let graph = unit(vec![ternary, variable("p"), variable("a"), fallback], 0);
        let err = compile_error(&graph);
        assert_eq!(err.code(), BC_ERR_UNREAD);
        match err {
            GenerationError::Unreadable { unread, partial_code } => {
                assert_eq!(unread, vec!["a".to_string(), "p ? a : null".to_string()]);
                assert!(partial_code.contains("batch finished"), "{}", partial_code);
            }
            other => panic!("expected unreadable, got {other}"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BC-ERR-CACHE-003: Layout Drift
    // ═══════════════════════════════════════════════════════════════════════════════

    const CACHED_UNIT: &str = r#"{
        "layout": "cached",
        "package": "com.example",
        "expressions": [ { "kind": "identifier", "code": "title", "variable": true } ],
        "bindings": [ { "target": "label", "attribute": "android:text", "expr": 0,
                        "setter": "{target}.setText({0})" } ]
    }"#;

    #[test]
    fn unchanged_layout_passes_the_cache_twice() {
        let dir = tempfile::tempdir().unwrap();
        let options = CompileOptions {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let first = compile_source(CACHED_UNIT, "cached.binding.json", &options).unwrap();
        let second = compile_source(CACHED_UNIT, "cached.binding.json", &options).unwrap();
        assert_eq!(first.source, second.source);
        let cache = IncrementalCache::new(dir.path()).unwrap();
        assert_eq!(
            cache.get("cached.binding.json", CACHED_UNIT),
            Some(first.layout.snapshot())
        );
    }

    #[test]
    fn drifted_layout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IncrementalCache::new(dir.path()).unwrap();
        let stale = FlagLayoutSnapshot {
            bucket_count: 1,
            mapping: vec!["_all".into(), "subtitle".into()],
        };
        cache.set("cached.binding.json", CACHED_UNIT, &stale).unwrap();

        let options = CompileOptions {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let result = compile_layout_internal(CACHED_UNIT, "cached.binding.json", &options);
        assert!(result.source.is_none());
        assert_eq!(result.errors[0].code, BC_ERR_CACHE);
        assert!(result.errors[0].message.contains("subtitle"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BC-ERR-INPUT-005: Malformed Graphs
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn out_of_range_child_is_rejected() {
        let broken = ExpressionInput {
            code: "f({0})".into(),
            children: vec![7],
            ..Default::default()
        };
        let err = compile_error(&unit(vec![broken], 0));
        assert_eq!(err.code(), BC_ERR_INPUT);
        assert!(err.to_string().contains("expression 7"));
    }

    #[test]
    fn ternary_needs_three_children() {
        let ternary = ExpressionInput {
            kind: ExprKind::Ternary,
            code: "{0} ? {1} : null".into(),
            children: vec![1, 2],
            ..Default::default()
        };
        let err = compile_error(&unit(vec![ternary, variable("p"), variable("a")], 0));
        assert_eq!(err.code(), BC_ERR_INPUT);
    }

    #[test]
    fn binding_to_missing_expression_is_rejected() {
        let err = compile_error(&unit(vec![variable("a")], 3));
        assert_eq!(err.code(), BC_ERR_INPUT);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut first = variable("a");
        first.key = Some("same".into());
        let mut second = variable("b");
        second.key = Some("same".into());
        let err = compile_error(&unit(vec![first, second], 0));
        assert_eq!(err.code(), BC_ERR_INPUT);
    }

    #[test]
    fn mistyped_fields_are_input_errors() {
        let json = r#"{ "layout": "x", "expressions": [ { "code": 3 } ] }"#;
        let result = compile_layout_internal(json, "x.binding.json", &CompileOptions::default());
        assert_eq!(result.errors[0].code, BC_ERR_INPUT);
        assert_eq!(result.errors[0].error_type, "INVALID_INPUT");
    }
}
