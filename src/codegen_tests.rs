//! Binder Codegen Tests
//!
//! Golden checks on the emitted binder class:
//! - `executeBindings` snapshots the flags, reads in plan order, then assigns
//! - ternary predicates set requirement bits on the local flags
//! - units with more than 64 bits spill into suffixed buckets
//! - setter api levels, old values, and the flag mapping comment

#[cfg(test)]
mod tests {
    use crate::parse::{compile_graph, compile_source, CompileOptions};
    use crate::validate::{BindingInput, ExprKind, ExpressionInput, GraphInput, VariableInput};
    use pretty_assertions::assert_eq;

    const SIMPLE: &str = r#"{
        "layout": "activity_main",
        "package": "com.example",
        "expressions": [
            { "kind": "fieldAccess", "code": "{0}.name", "children": [1], "type": "java.lang.String",
              "bindableProperties": ["name"] },
            { "kind": "identifier", "code": "user", "variable": true, "observable": true,
              "nullable": true, "type": "com.example.User" }
        ],
        "bindings": [
            { "target": "label", "attribute": "android:text", "expr": 0,
              "setter": "{target}.setText({0})" }
        ],
        "variables": [ { "name": "user", "type": "com.example.User", "expr": 1 } ]
    }"#;

    const LAZY_TERNARY: &str = r#"{
        "layout": "lazy",
        "package": "com.example",
        "expressions": [
            { "kind": "ternary", "code": "{0} ? {1} : {2}", "children": [1, 2, 4],
              "type": "java.lang.String" },
            { "kind": "identifier", "code": "cond", "variable": true, "type": "boolean",
              "defaultValue": "false" },
            { "kind": "methodCall", "code": "{0}.getA()", "children": [3], "type": "java.lang.String" },
            { "kind": "identifier", "code": "x", "variable": true, "type": "com.example.X" },
            { "kind": "methodCall", "code": "{0}.getB()", "children": [5], "type": "java.lang.String" },
            { "kind": "identifier", "code": "y", "variable": true, "type": "com.example.Y" }
        ],
        "bindings": [
            { "target": "label", "attribute": "android:text", "expr": 0,
              "setter": "{target}.setText({0})" }
        ],
        "variables": [
            { "name": "cond", "type": "boolean", "expr": 1 },
            { "name": "x", "type": "com.example.X", "expr": 3 },
            { "name": "y", "type": "com.example.Y", "expr": 5 }
        ]
    }"#;

    fn emit(json: &str, options: &CompileOptions) -> String {
        compile_source(json, "unit.binding.json", options).unwrap().source
    }

    fn section<'a>(source: &'a str, start: &str, end: &str) -> &'a str {
        let from = source
            .find(start)
            .unwrap_or_else(|| panic!("`{}` not found in:\n{}", start, source));
        let to = source[from..]
            .find(end)
            .map(|offset| from + offset)
            .unwrap_or_else(|| panic!("`{}` not found after `{}`", end, start));
        &source[from..to]
    }

    fn execute_bindings(source: &str) -> &str {
        section(source, "    protected void executeBindings() {\n", "    // dirty flag")
    }

    fn text_binding(target: &str, expr: usize) -> BindingInput {
        BindingInput {
            target: target.into(),
            attribute: "android:text".into(),
            expr,
            components: None,
            setter: "{target}.setText({0})".into(),
            min_api: 1,
            requires_old_value: false,
        }
    }

    /// One `java.lang.String` variable bound to a label.
    fn title_unit(binding: BindingInput) -> GraphInput {
        GraphInput {
            layout: "title".into(),
            package: "com.example".into(),
            class_name: None,
            expressions: vec![ExpressionInput {
                kind: ExprKind::Identifier,
                code: "title".into(),
                variable: true,
                type_name: Some("java.lang.String".into()),
                ..Default::default()
            }],
            bindings: vec![binding],
            variables: vec![VariableInput {
                name: "title".into(),
                type_name: "java.lang.String".into(),
                expr: Some(0),
            }],
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EXECUTE BINDINGS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn field_access_is_read_behind_a_null_check() {
        let source = emit(SIMPLE, &CompileOptions::default());
        assert_eq!(
            execute_bindings(&source),
            r#"    protected void executeBindings() {
        long dirtyFlags = 0;
        synchronized(this) {
            dirtyFlags = mDirtyFlags;
            mDirtyFlags = 0;
        }
        com.example.User user = mUser;
        java.lang.String userName = null;

        if ((dirtyFlags & 0x7L) != 0) {
            if (user != null) {
                // read user.name
                userName = user.name;
            }
        }
        // batch finished
        if ((dirtyFlags & 0x7L) != 0) {
            // api target 1
            this.label.setText(userName);
        }
    }
"#
        );
    }

    #[test]
    fn ternary_arms_are_read_after_the_predicate() {
        let source = emit(LAZY_TERNARY, &CompileOptions::default());
        assert_eq!(
            execute_bindings(&source),
            r#"    protected void executeBindings() {
        long dirtyFlags = 0;
        synchronized(this) {
            dirtyFlags = mDirtyFlags;
            mDirtyFlags = 0;
        }
        boolean cond = mCond;
        com.example.X x = mX;
        java.lang.String xGetA = null;
        com.example.Y y = mY;
        java.lang.String yGetB = null;
        java.lang.String condXGetAYGetB = null;

        if ((dirtyFlags & 0xfL) != 0) {
            if((dirtyFlags & 0xfL) != 0) {
                if(cond) {
                    dirtyFlags |= 0x20L;
                }
                else {
                    dirtyFlags |= 0x10L;
                }
            }
        }
        // batch finished

        if ((dirtyFlags & 0x10L) != 0) {
            // read y.getB()
            yGetB = y.getB();
        }

        if ((dirtyFlags & 0x20L) != 0) {
            // read x.getA()
            xGetA = x.getA();
        }

        if ((dirtyFlags & 0xfL) != 0) {
            // read cond ? x.getA() : y.getB()
            condXGetAYGetB = cond ? xGetA : yGetB;
        }
        // batch finished
        if ((dirtyFlags & 0xfL) != 0) {
            // api target 1
            this.label.setText(condXGetAYGetB);
        }
    }
"#
        );
    }

    #[test]
    fn nullable_predicate_is_unboxed_safely() {
        let json = LAZY_TERNARY.replace(
            r#""code": "cond", "variable": true, "type": "boolean""#,
            r#""code": "cond", "variable": true, "nullable": true, "type": "java.lang.Boolean""#,
        );
        let source = emit(&json, &CompileOptions::default());
        assert!(source.contains("if(Boolean.TRUE.equals(cond)) {"), "{}", source);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CLASS MEMBERS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn invalidate_all_sets_every_invalidatable_bit() {
        let source = emit(SIMPLE, &CompileOptions::default());
        assert_eq!(
            section(&source, "    public void invalidateAll() {", "    @Override\n    public boolean"),
            r#"    public void invalidateAll() {
        synchronized(this) {
            mDirtyFlags = 0x7L;
        }
        requestRebind();
    }

"#
        );
    }

    #[test]
    fn setter_registers_and_dirties_its_variable() {
        let source = emit(SIMPLE, &CompileOptions::default());
        assert_eq!(
            section(&source, "    public void setUser(", "    public com.example.User getUser()"),
            r#"    public void setUser(com.example.User user) {
        updateRegistration(0, user);
        this.mUser = user;
        synchronized(this) {
            mDirtyFlags |= 0x2L;
        }
        notifyPropertyChanged(BR.user);
        super.requestRebind();
    }
"#
        );
        assert!(source.contains(
            "        if (BR.user == variableId) {\n            setUser((com.example.User) variable);\n        }\n        else {\n            variableSet = false;\n        }\n"
        ));
    }

    #[test]
    fn property_changes_dirty_the_field_access() {
        let source = emit(SIMPLE, &CompileOptions::default());
        assert!(source.contains(
            "            case 0 :\n                return onChangeUser((com.example.User) object, fieldId);\n"
        ));
        assert_eq!(
            section(&source, "    private boolean onChangeUser(", "    @Override\n    protected void executeBindings"),
            r#"    private boolean onChangeUser(com.example.User user, int fieldId) {
        if (fieldId == BR._all) {
            synchronized(this) {
                mDirtyFlags |= 0x2L;
            }
            return true;
        }
        else if (fieldId == BR.name) {
            synchronized(this) {
                mDirtyFlags |= 0x4L;
            }
            return true;
        }
        return false;
    }

"#
        );
    }

    #[test]
    fn constructor_passes_observable_count() {
        let source = emit(SIMPLE, &CompileOptions::default());
        assert!(source.contains(
            "    public ActivityMainBindingImpl(androidx.databinding.DataBindingComponent bindingComponent, android.view.View root, android.view.View label) {\n        super(bindingComponent, root, 1);\n        this.label = label;\n        invalidateAll();\n    }\n"
        ));
    }

    #[test]
    fn flag_mapping_lists_every_bit() {
        let source = emit(SIMPLE, &CompileOptions::default());
        assert!(source.ends_with(
            r#"    // dirty flag
    private long mDirtyFlags = 0xffffffffffffffffL;
    /* flag mapping
        flag 0 (0x1L): _all
        flag 1 (0x2L): user
        flag 2 (0x4L): user.name
    flag mapping end*/
    //end
}
"#
        ));

        let quiet = CompileOptions {
            emit_flag_mapping: false,
            ..Default::default()
        };
        let source = emit(SIMPLE, &quiet);
        assert!(!source.contains("flag mapping"));
        assert!(source.ends_with("    //end\n}\n"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // WIDE UNITS AND SETTERS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn seventy_variables_spill_into_a_second_bucket() {
        let count = 70;
        let graph = GraphInput {
            layout: "wide".into(),
            package: "com.example".into(),
            class_name: None,
            expressions: (0..count)
                .map(|i| ExpressionInput {
                    kind: ExprKind::Identifier,
                    code: format!("v{}", i),
                    variable: true,
                    type_name: Some("java.lang.String".into()),
                    ..Default::default()
                })
                .collect(),
            bindings: (0..count).map(|i| text_binding(&format!("view{}", i), i)).collect(),
            variables: vec![],
        };
        let unit = compile_graph(&graph, &CompileOptions::default()).unwrap();
        assert_eq!(unit.layout.bucket_count, 2);
        let source = unit.source;
        assert!(source.contains("        long dirtyFlags = 0;\n        long dirtyFlags_1 = 0;\n"));
        assert!(source.contains("            dirtyFlags_1 = mDirtyFlags_1;\n            mDirtyFlags_1 = 0;\n"));
        assert!(source.contains("            mDirtyFlags_1 = 0x7fL;\n"));
        assert!(source.contains("if (mDirtyFlags != 0 || mDirtyFlags_1 != 0) {"));
        // v64 owns bit 65, the second bit of bucket 1.
        assert!(
            source.contains("        if (((dirtyFlags & 0x1L) != 0) || ((dirtyFlags_1 & 0x2L) != 0)) {\n            // api target 1\n            this.view64.setText(v64);\n"),
            "{}",
            source
        );
        assert!(source.contains("    private long mDirtyFlags_1 = 0xffffffffffffffffL;\n"));
    }

    #[test]
    fn newer_setters_are_gated_on_the_platform_level() {
        let mut binding = text_binding("label", 0);
        binding.min_api = 21;
        let graph = title_unit(binding);

        let source = compile_graph(&graph, &CompileOptions::default()).unwrap().source;
        assert!(source.contains(
            "            // api target 21\n            if(getBuildSdkInt() >= 21) {\n                this.label.setText(title);\n            }\n"
        ));

        let modern = CompileOptions {
            min_api: 21,
            ..Default::default()
        };
        let source = compile_graph(&graph, &modern).unwrap().source;
        assert!(!source.contains("getBuildSdkInt()"));
        assert!(source.contains("            // api target 21\n            this.label.setText(title);\n"));
    }

    #[test]
    fn old_values_are_captured_after_assignment() {
        let mut binding = text_binding("label", 0);
        binding.setter = "{target}.setText({old0}, {0})".into();
        binding.requires_old_value = true;
        let source = compile_graph(&title_unit(binding), &CompileOptions::default())
            .unwrap()
            .source;
        assert!(source.contains("    // values\n    private java.lang.String mOldTitle;\n"));
        assert!(source.ends_with(
            "        }\n        if ((dirtyFlags & 0x3L) != 0) {\n            this.mOldTitle = title;\n        }\n    }\n    // dirty flag\n    private long mDirtyFlags = 0xffffffffffffffffL;\n    /* flag mapping\n        flag 0 (0x1L): _all\n        flag 1 (0x2L): title\n    flag mapping end*/\n    //end\n}\n"
        ));
        assert!(source.contains("this.label.setText(this.mOldTitle, title);"));
    }

    #[test]
    fn explicit_class_name_wins() {
        let mut graph = title_unit(text_binding("label", 0));
        graph.class_name = Some("TitleBinding".into());
        let source = compile_graph(&graph, &CompileOptions::default()).unwrap().source;
        assert!(source.contains("public class TitleBinding extends androidx.databinding.ViewDataBinding {"));
        assert!(source.starts_with("package com.example;\n\n"));
    }

    #[test]
    fn emission_is_deterministic() {
        let options = CompileOptions::default();
        assert_eq!(emit(LAZY_TERNARY, &options), emit(LAZY_TERNARY, &options));
    }
}
